/*!
 * Service registry for tvlink.
 *
 * The registry turns discovered devices into device services by selecting an
 * adapter for each one, and keeps the services it created.
 */
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use tvlink_core::{config::SessionConfig, types::Id};

use crate::capability::CapabilityGroup;
use crate::device::{DeviceError, DeviceInfo, Result};
use crate::protocol::ProviderRegistry;
use crate::service::DeviceService;

/// Event types for the service registry
#[derive(Debug, Clone)]
pub enum RegistryEvent {
    /// A service was added to the registry
    ServiceAdded(DeviceInfo),
    /// A service was removed from the registry
    ServiceRemoved(Id),
}

/// Service registry
#[derive(Debug)]
pub struct ServiceRegistry {
    providers: ProviderRegistry,
    config: SessionConfig,
    services: RwLock<HashMap<Id, DeviceService>>,
    event_sender: broadcast::Sender<RegistryEvent>,
}

impl ServiceRegistry {
    /// Create a registry selecting adapters from `providers`
    pub fn new(providers: ProviderRegistry, config: SessionConfig) -> Self {
        let (event_sender, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            providers,
            config,
            services: RwLock::new(HashMap::new()),
            event_sender,
        }
    }

    /// Select an adapter for a discovered device and register its service
    ///
    /// Selecting a device that is already registered returns the existing
    /// service.
    pub fn select(&self, info: DeviceInfo) -> Result<DeviceService> {
        if let Some(existing) = self.services.read().get(&info.id) {
            return Ok(existing.clone());
        }

        let adapter = self.providers.create_adapter(&info)?;
        let service = DeviceService::new(info, adapter, self.config.clone());

        let mut services = self.services.write();
        if let Some(existing) = services.get(service.id()) {
            return Ok(existing.clone());
        }
        services.insert(service.id().clone(), service.clone());
        drop(services);

        let _ = self
            .event_sender
            .send(RegistryEvent::ServiceAdded(service.info().clone()));
        debug!(device = %service.id(), adapter = %service.adapter_kind(), "Selected adapter");
        Ok(service)
    }

    /// Register a service built elsewhere
    pub fn register(&self, service: DeviceService) -> Result<()> {
        let id = service.id().clone();
        {
            let mut services = self.services.write();
            if services.contains_key(&id) {
                return Err(DeviceError::AlreadyRegistered(id));
            }
            services.insert(id.clone(), service.clone());
        }

        let _ = self
            .event_sender
            .send(RegistryEvent::ServiceAdded(service.info().clone()));
        debug!("Registered service with ID {}", id);
        Ok(())
    }

    /// Remove a service and disconnect it
    pub async fn release(&self, id: &Id) -> Result<()> {
        let service = self
            .services
            .write()
            .remove(id)
            .ok_or_else(|| DeviceError::DeviceNotFound(id.clone()))?;

        let _ = self.event_sender.send(RegistryEvent::ServiceRemoved(id.clone()));
        debug!("Released service with ID {}", id);
        service.disconnect().await
    }

    /// Get a service by ID
    pub fn get(&self, id: &Id) -> Result<DeviceService> {
        self.services
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| DeviceError::DeviceNotFound(id.clone()))
    }

    /// Get all registered services
    pub fn services(&self) -> Vec<DeviceService> {
        self.services.read().values().cloned().collect()
    }

    /// Get all registered IDs
    pub fn ids(&self) -> Vec<Id> {
        self.services.read().keys().cloned().collect()
    }

    /// Services supporting a capability group, highest priority first
    pub fn services_with(&self, group: CapabilityGroup) -> Vec<DeviceService> {
        let mut matching: Vec<DeviceService> = self
            .services
            .read()
            .values()
            .filter(|service| service.supports(group))
            .cloned()
            .collect();
        matching.sort_by(|a, b| {
            b.priority(group)
                .cmp(&a.priority(group))
                .then_with(|| a.id().cmp(b.id()))
        });
        matching
    }

    /// Preferred service for a capability group among the services of one device address
    pub fn best_for(&self, address: &str, group: CapabilityGroup) -> Option<DeviceService> {
        self.services_with(group)
            .into_iter()
            .find(|service| service.info().address == address)
    }

    /// Subscribe to registry events
    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.event_sender.subscribe()
    }

    /// Connect all services
    ///
    /// Returns the first failure after attempting every service.
    pub async fn connect_all(&self) -> Result<()> {
        let services = self.services();
        let mut first_error = None;

        for service in &services {
            debug!("Connecting service with ID {}", service.id());
            if let Err(e) = service.connect().await {
                warn!("Failed to connect service with ID {}: {}", service.id(), e);
                first_error.get_or_insert(e);
            }
        }

        info!("Connected {} services", services.len());
        first_error.map_or(Ok(()), Err)
    }

    /// Disconnect all services
    pub async fn disconnect_all(&self) -> Result<()> {
        let services = self.services();

        for service in &services {
            debug!("Disconnecting service with ID {}", service.id());
            if let Err(e) = service.disconnect().await {
                warn!("Failed to disconnect service with ID {}: {}", service.id(), e);
            }
        }

        info!("Disconnected {} services", services.len());
        Ok(())
    }

    /// Count registered services
    pub fn count(&self) -> usize {
        self.services.read().len()
    }

    /// Check if a service is registered
    pub fn contains(&self, id: &Id) -> bool {
        self.services.read().contains_key(id)
    }
}

/// A shared service registry that can be cloned
#[derive(Debug, Clone)]
pub struct SharedServiceRegistry(Arc<ServiceRegistry>);

impl SharedServiceRegistry {
    /// Create a new shared service registry
    pub fn new(providers: ProviderRegistry, config: SessionConfig) -> Self {
        Self(Arc::new(ServiceRegistry::new(providers, config)))
    }

    /// Get a reference to the service registry
    pub fn registry(&self) -> &ServiceRegistry {
        &self.0
    }
}

impl AsRef<ServiceRegistry> for SharedServiceRegistry {
    fn as_ref(&self) -> &ServiceRegistry {
        self.registry()
    }
}
