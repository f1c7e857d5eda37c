use std::fmt::Debug;
use std::future::Future;
use std::pin::Pin;

use futures::Stream;
use uuid::Uuid;

use crate::error::Result;

/// Fires once per link drop observed by the transport
pub type DisconnectEvents = Pin<Box<dyn Stream<Item = ()> + Send>>;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceFilter {
    pub name_prefix: String,
    /// Services the caller may look up once connected, anything else is refused
    pub optional_services: Vec<Uuid>,
}

impl DeviceFilter {
    pub fn new(name_prefix: impl Into<String>, optional_services: Vec<Uuid>) -> Self {
        Self {
            name_prefix: name_prefix.into(),
            optional_services,
        }
    }

    pub fn matches(&self, name: &str) -> bool {
        name.starts_with(&self.name_prefix)
    }
}

/// Platform side of the link. Each step of a connection is its own call so the adapter owns the
/// sequencing and can tell which handles were acquired when one of them fails.
pub trait Transport: Send + Sync + 'static {
    type Device: Clone + Debug + Send + Sync + 'static;
    type Server: Clone + Debug + Send + Sync + 'static;
    type Service: Clone + Debug + Send + Sync + 'static;
    type Characteristic: Clone + Debug + Send + Sync + 'static;

    fn request_device(
        &self,
        filter: &DeviceFilter,
    ) -> impl Future<Output = Result<Self::Device>> + Send;

    fn connect_gatt(
        &self,
        device: &Self::Device,
    ) -> impl Future<Output = Result<Self::Server>> + Send;

    fn primary_service(
        &self,
        server: &Self::Server,
        uuid: Uuid,
    ) -> impl Future<Output = Result<Self::Service>> + Send;

    fn characteristic(
        &self,
        service: &Self::Service,
        uuid: Uuid,
    ) -> impl Future<Output = Result<Self::Characteristic>> + Send;

    fn write(
        &self,
        characteristic: &Self::Characteristic,
        bytes: &[u8],
    ) -> impl Future<Output = Result<()>> + Send;

    fn is_connected(&self, server: &Self::Server) -> impl Future<Output = Result<bool>> + Send;

    fn disconnect(&self, server: &Self::Server) -> impl Future<Output = Result<()>> + Send;

    fn disconnect_events(
        &self,
        device: &Self::Device,
    ) -> impl Future<Output = Result<DisconnectEvents>> + Send;
}
