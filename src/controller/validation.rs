//! Validation logic for Unit specs.
//!
//! Runs before any store write. Every failure is a non-retryable
//! [`Error::Validation`]: the Unit has to be edited before another pass can
//! succeed.

use std::collections::HashSet;

use k8s_openapi::api::core::v1::ServicePort;
use kube::ResourceExt;

use crate::controller::error::{Error, Result};
use crate::crd::{OwnIngress, OwnService, Unit};

/// Validate the Unit spec
pub fn validate_spec(unit: &Unit) -> Result<()> {
    validate_replicas(unit)?;
    validate_template(unit)?;

    let relation = &unit.spec.relation_resource;
    if let Some(service) = &relation.service {
        validate_service(service)?;
    }
    if let Some(ingress) = &relation.ingress {
        validate_ingress(unit, ingress)?;
    }
    Ok(())
}

fn validate_replicas(unit: &Unit) -> Result<()> {
    match unit.spec.replicas {
        Some(replicas) if replicas < 0 => Err(Error::Validation(format!(
            "replica count {} must not be negative",
            replicas
        ))),
        _ => Ok(()),
    }
}

fn validate_template(unit: &Unit) -> Result<()> {
    let containers = unit
        .spec
        .template
        .spec
        .as_ref()
        .map_or(0, |spec| spec.containers.len());
    if containers == 0 {
        return Err(Error::Validation(
            "pod template must declare at least one container".to_string(),
        ));
    }
    Ok(())
}

fn protocol(port: &ServicePort) -> &str {
    port.protocol.as_deref().unwrap_or("TCP")
}

/// Validate the network spec: at least one port, no colliding ports or names.
fn validate_service(service: &OwnService) -> Result<()> {
    if service.ports.is_empty() {
        return Err(Error::Validation(
            "service must declare at least one port".to_string(),
        ));
    }

    let mut numbers = HashSet::new();
    let mut names = HashSet::new();
    for port in &service.ports {
        if !(1..=65535).contains(&port.port) {
            return Err(Error::Validation(format!(
                "service port {} is out of range",
                port.port
            )));
        }
        if !numbers.insert((port.port, protocol(port))) {
            return Err(Error::Validation(format!(
                "service port {}/{} is declared more than once",
                port.port,
                protocol(port)
            )));
        }
        if let Some(name) = port.name.as_deref().filter(|n| !n.is_empty()) {
            if !names.insert(name) {
                return Err(Error::Validation(format!(
                    "service port name {:?} is declared more than once",
                    name
                )));
            }
        }
    }
    Ok(())
}

/// Validate the ingress spec against the Unit's own service.
fn validate_ingress(unit: &Unit, ingress: &OwnIngress) -> Result<()> {
    let unit_name = unit.name_any();
    let service = unit.spec.relation_resource.service.as_ref();
    let mut routes = HashSet::new();

    for rule in &ingress.rules {
        let host = rule.host.as_deref().unwrap_or("");
        let Some(http) = &rule.http else {
            continue;
        };
        for path in &http.paths {
            let route = path.path.as_deref().unwrap_or("/");
            if !routes.insert((host, route)) {
                return Err(Error::Validation(format!(
                    "ingress route {}{} is declared more than once",
                    host, route
                )));
            }

            let Some(backend) = &path.backend.service else {
                continue;
            };
            if backend.name != unit_name {
                continue;
            }
            let Some(service) = service else {
                return Err(Error::Validation(format!(
                    "ingress route {}{} targets service {} which is not declared",
                    host, route, unit_name
                )));
            };
            let port = backend.port.as_ref();
            let declared = service.ports.iter().any(|p| match port {
                Some(bp) => match (bp.number, bp.name.as_deref()) {
                    (Some(number), _) => p.port == number,
                    (None, Some(name)) => p.name.as_deref() == Some(name),
                    (None, None) => false,
                },
                None => false,
            });
            if !declared {
                return Err(Error::Validation(format!(
                    "ingress route {}{} targets an undeclared port of service {}",
                    host, route, unit_name
                )));
            }
        }
    }
    Ok(())
}
