//! File-backed service registry.
//!
//! Registrations are kept in memory and rewritten to the persistence file
//! on every change, one `name&address` pair per line.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::{debug, info};

use crate::error::{RegistryError, Result};

const SEPARATOR: char = '&';

/// Service name → registered addresses.
pub type ServiceMap = BTreeMap<String, Vec<String>>;

#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    services: Mutex<ServiceMap>,
}

impl FileStore {
    /// Open the store at `path`, loading existing registrations. A missing
    /// file is an empty registry.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let services = match std::fs::read_to_string(&path) {
            Ok(content) => parse(&content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => ServiceMap::new(),
            Err(e) => return Err(e.into()),
        };
        info!(path = %path.display(), services = services.len(), "opened registry store");
        Ok(Self {
            path,
            services: Mutex::new(services),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Record `address` under `name`. Returns `false` if it was already there.
    pub fn add(&self, name: &str, address: &str) -> Result<bool> {
        let mut services = self.lock();
        if services
            .get(name)
            .is_some_and(|addrs| addrs.iter().any(|a| a == address))
        {
            return Ok(false);
        }
        let mut next = services.clone();
        next.entry(name.to_string())
            .or_default()
            .push(address.to_string());
        self.commit(&mut services, next)?;
        debug!(name, address, "registered service address");
        Ok(true)
    }

    /// Registered addresses, optionally restricted to `services` or to
    /// `addresses`. Naming both at once is ambiguous and rejected.
    pub fn select(&self, services: &[String], addresses: &[String]) -> Result<Vec<String>> {
        if !services.is_empty() && !addresses.is_empty() {
            return Err(RegistryError::BadRequest(
                "use either service or address filters, not both".to_string(),
            ));
        }
        let registered = self.lock();

        let selected = if !services.is_empty() {
            let mut out = Vec::new();
            for name in services {
                let addrs = registered
                    .get(name)
                    .ok_or_else(|| RegistryError::UnknownService(name.clone()))?;
                out.extend(addrs.iter().cloned());
            }
            out
        } else if !addresses.is_empty() {
            for address in addresses {
                if !registered.values().flatten().any(|a| a == address) {
                    return Err(RegistryError::UnknownAddress(address.clone()));
                }
            }
            addresses.to_vec()
        } else {
            registered.values().flatten().cloned().collect()
        };

        if selected.is_empty() {
            return Err(RegistryError::NoServices);
        }
        Ok(selected)
    }

    /// Forget whole services and/or individual addresses. Returns how many
    /// addresses were removed.
    pub fn remove(&self, services: &[String], addresses: &[String]) -> Result<usize> {
        let mut registered = self.lock();
        let mut next = registered.clone();

        for name in services {
            next.remove(name);
        }
        for addrs in next.values_mut() {
            addrs.retain(|a| !addresses.contains(a));
        }
        next.retain(|_, addrs| !addrs.is_empty());

        let removed = count(&registered) - count(&next);
        if removed > 0 {
            self.commit(&mut registered, next)?;
        }
        Ok(removed)
    }

    /// Forget every registration.
    pub fn clear_all(&self) -> Result<()> {
        let mut registered = self.lock();
        self.commit(&mut registered, ServiceMap::new())
    }

    pub fn snapshot(&self) -> ServiceMap {
        self.lock().clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ServiceMap> {
        self.services
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Write `next` to disk, then make it the live map. A failed write
    /// leaves the live map untouched.
    fn commit(&self, live: &mut ServiceMap, next: ServiceMap) -> Result<()> {
        self.persist(&next)?;
        *live = next;
        Ok(())
    }

    fn persist(&self, services: &ServiceMap) -> Result<()> {
        let mut content = String::new();
        for (name, addresses) in services {
            for address in addresses {
                content.push_str(name);
                content.push(SEPARATOR);
                content.push_str(address);
                content.push('\n');
            }
        }
        std::fs::write(&self.path, content)?;
        Ok(())
    }
}

fn count(services: &ServiceMap) -> usize {
    services.values().map(Vec::len).sum()
}

fn parse(content: &str) -> ServiceMap {
    let mut services = ServiceMap::new();
    for line in content.lines().map(str::trim).filter(|l| !l.is_empty()) {
        if let Some((name, address)) = line.split_once(SEPARATOR) {
            let addrs: &mut Vec<String> = services.entry(name.to_string()).or_default();
            if !addrs.iter().any(|a| a == address) {
                addrs.push(address.to_string());
            }
        }
    }
    services
}
