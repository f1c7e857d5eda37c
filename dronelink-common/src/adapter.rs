use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use futures::StreamExt;
use log::*;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::config::AdapterConfig;
use crate::controller::ControllerData;
use crate::error::{LinkError, Result};
use crate::transport::{DeviceFilter, DisconnectEvents, Transport};

/// What a presentation layer observes about the link
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LinkStatus {
    pub is_connected: bool,
    /// Only true while a `connect()` call is in flight
    pub is_connecting: bool,
    pub error: Option<String>,
}

struct Link<T: Transport> {
    id: u64,
    device: T::Device,
    server: T::Server,
    characteristic: T::Characteristic,
    monitor: JoinHandle<()>,
}

/// The three link handles exist together or not at all
enum Session<T: Transport> {
    Disconnected,
    Connected(Link<T>),
}

impl<T: Transport> Session<T> {
    fn take(&mut self) -> Option<Link<T>> {
        match std::mem::replace(self, Session::Disconnected) {
            Session::Connected(link) => Some(link),
            Session::Disconnected => None,
        }
    }
}

struct Inner<T: Transport> {
    transport: T,
    filter: DeviceFilter,
    service_uuid: Uuid,
    characteristic_uuid: Uuid,
    session: Mutex<Session<T>>,
    connect_lock: Mutex<()>,
    status: watch::Sender<LinkStatus>,
    next_link_id: AtomicU64,
}

impl<T: Transport> Inner<T> {
    async fn on_disconnected(&self, link_id: u64) {
        let mut session = self.session.lock().await;

        match &*session {
            Session::Connected(link) if link.id == link_id => {}
            // Explicitly disconnected or replaced by a newer link in the meantime
            _ => return,
        }

        if let Some(link) = session.take() {
            warn!("Device {:?} dropped the connection", link.device);
        }

        // Published under the session lock so a newer link can't be overwritten
        self.status.send_modify(|status| {
            status.is_connected = false;
            status.error = Some(LinkError::Disconnected.to_string());
        });
    }

    fn record_error(&self, err: &LinkError) {
        self.status
            .send_modify(|status| status.error = Some(err.to_string()));
    }
}

/// Resets `is_connecting` however the connect attempt ends
struct ConnectingGuard<'a>(&'a watch::Sender<LinkStatus>);

impl<'a> ConnectingGuard<'a> {
    fn start(status: &'a watch::Sender<LinkStatus>) -> Self {
        status.send_modify(|status| {
            status.is_connecting = true;
            status.error = None;
        });

        Self(status)
    }
}

impl Drop for ConnectingGuard<'_> {
    fn drop(&mut self) {
        self.0.send_modify(|status| status.is_connecting = false);
    }
}

/// Wraps a single link to one peripheral and streams [`ControllerData`] to it.
///
/// Cloning is cheap, every clone drives the same link.
pub struct ConnectionAdapter<T: Transport> {
    inner: Arc<Inner<T>>,
}

impl<T: Transport> Clone for ConnectionAdapter<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Transport> ConnectionAdapter<T> {
    pub fn new(transport: T, config: &AdapterConfig) -> Self {
        let (status, _) = watch::channel(LinkStatus::default());

        Self {
            inner: Arc::new(Inner {
                transport,
                filter: DeviceFilter::new(config.name_prefix.clone(), vec![config.service_uuid]),
                service_uuid: config.service_uuid,
                characteristic_uuid: config.characteristic_uuid,
                session: Mutex::new(Session::Disconnected),
                connect_lock: Mutex::new(()),
                status,
                next_link_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn status(&self) -> LinkStatus {
        self.inner.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<LinkStatus> {
        self.inner.status.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.inner.status.borrow().is_connected
    }

    pub fn is_connecting(&self) -> bool {
        self.inner.status.borrow().is_connecting
    }

    pub fn error(&self) -> Option<String> {
        self.inner.status.borrow().error.clone()
    }

    /// True when the device, server and characteristic handles are held
    #[cfg(test)]
    pub(crate) async fn has_link(&self) -> bool {
        matches!(&*self.inner.session.lock().await, Session::Connected(_))
    }

    /// Discovers the peripheral, opens its GATT server and resolves the control characteristic.
    ///
    /// Calling it while connected runs the whole discovery again and replaces the current link
    /// on success. Overlapping calls are run one after the other.
    pub async fn connect(&self) -> Result<()> {
        let _attempt = self.inner.connect_lock.lock().await;
        let _connecting = ConnectingGuard::start(&self.inner.status);

        info!(
            "Looking for a device named \"{}*\"",
            self.inner.filter.name_prefix
        );

        let (device, server, characteristic, events) = match self.open_link().await {
            Ok(handles) => handles,
            Err(err) => {
                error!("Failed to connect: {err}");
                self.inner.record_error(&err);
                return Err(err);
            }
        };

        info!("Connected to device {device:?}");

        let previous = {
            let mut session = self.inner.session.lock().await;
            let previous = session.take();

            // The monitor blocks on the session lock, so it only sees the link once it is stored
            let id = self.inner.next_link_id.fetch_add(1, Ordering::Relaxed);
            let monitor = tokio::spawn(watch_disconnects(Arc::downgrade(&self.inner), id, events));

            *session = Session::Connected(Link {
                id,
                device,
                server,
                characteristic,
                monitor,
            });
            self.inner
                .status
                .send_modify(|status| status.is_connected = true);

            previous
        };

        if let Some(previous) = previous {
            debug!("Dropping previous link to {:?}", previous.device);
            previous.monitor.abort();
        }

        Ok(())
    }

    async fn open_link(
        &self,
    ) -> Result<(T::Device, T::Server, T::Characteristic, DisconnectEvents)> {
        let transport = &self.inner.transport;

        let device = transport.request_device(&self.inner.filter).await?;
        debug!("Selected device {device:?}");

        let server = transport.connect_gatt(&device).await?;
        debug!("GATT server connected");

        match self.resolve_characteristic(&device, &server).await {
            Ok((characteristic, events)) => Ok((device, server, characteristic, events)),
            Err(err) => {
                // Don't leave the peripheral connected when the attempt is abandoned
                if let Err(release_err) = transport.disconnect(&server).await {
                    warn!("Failed to release the GATT server of {device:?}: {release_err}");
                }

                Err(err)
            }
        }
    }

    async fn resolve_characteristic(
        &self,
        device: &T::Device,
        server: &T::Server,
    ) -> Result<(T::Characteristic, DisconnectEvents)> {
        let transport = &self.inner.transport;

        let service = transport
            .primary_service(server, self.inner.service_uuid)
            .await?;
        let characteristic = transport
            .characteristic(&service, self.inner.characteristic_uuid)
            .await?;
        let events = transport.disconnect_events(device).await?;

        Ok((characteristic, events))
    }

    /// Safe to call when already disconnected
    pub async fn disconnect(&self) -> Result<()> {
        let link = {
            let mut session = self.inner.session.lock().await;
            self.inner.status.send_modify(|status| {
                status.is_connected = false;
                status.error = None;
            });
            session.take()
        };

        let Some(link) = link else {
            return Ok(());
        };

        link.monitor.abort();

        if self.inner.transport.is_connected(&link.server).await? {
            self.inner.transport.disconnect(&link.server).await?;
            info!("Disconnected from device {:?}", link.device);
        }

        Ok(())
    }

    /// One snapshot, one write. Concurrent calls are not queued.
    pub async fn send_data(&self, data: &ControllerData) -> Result<()> {
        let characteristic = match &*self.inner.session.lock().await {
            Session::Connected(link) => link.characteristic.clone(),
            Session::Disconnected => {
                let err = LinkError::NotConnected;
                self.inner.record_error(&err);
                return Err(err);
            }
        };

        let result = match data.to_payload() {
            Ok(payload) => {
                trace!("Writing {} bytes", payload.len());
                self.inner.transport.write(&characteristic, &payload).await
            }
            Err(err) => Err(err),
        };

        if let Err(err) = &result {
            error!("Failed to send controller data: {err}");
            self.inner.record_error(err);
        }

        result
    }
}

async fn watch_disconnects<T: Transport>(
    inner: Weak<Inner<T>>,
    link_id: u64,
    mut events: DisconnectEvents,
) {
    if events.next().await.is_none() {
        return;
    }

    if let Some(inner) = inner.upgrade() {
        inner.on_disconnected(link_id).await;
    }
}
