use std::collections::HashSet;
use std::fmt;
use std::pin::Pin;
use std::time::Duration;

use btleplug::api::{
    BDAddr, Central, CentralEvent, CharPropFlags, Characteristic, Manager as _, Peripheral as _,
    ScanFilter, Service, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use futures::{future, stream, Stream, StreamExt};
use log::*;
use tokio::time;
use uuid::Uuid;

use crate::error::{LinkError, Result};
use crate::transport::{DeviceFilter, DisconnectEvents, Transport};

const NO_ADAPTER_FOUND: &str = "Failed to get Bluetooth adapter. (maybe your Bluetooth is OFF ?)";

type CentralEvents = Pin<Box<dyn Stream<Item = CentralEvent> + Send>>;

#[derive(Clone, Debug, Default, Hash, PartialEq, Eq, serde::Serialize)]
pub struct FoundDevice {
    pub address: String,
    pub name: String,
}

#[derive(Clone)]
pub struct BtleDevice {
    adapter: Adapter,
    peripheral: Peripheral,
    name: String,
    optional_services: Vec<Uuid>,
}

impl fmt::Debug for BtleDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.peripheral.address())
    }
}

#[derive(Clone, Debug)]
pub struct GattServer {
    peripheral: Peripheral,
    optional_services: Vec<Uuid>,
}

#[derive(Clone, Debug)]
pub struct GattService {
    peripheral: Peripheral,
    inner: Service,
}

#[derive(Clone, Debug)]
pub struct GattCharacteristic {
    peripheral: Peripheral,
    inner: Characteristic,
}

impl GattCharacteristic {
    // Acknowledged writes when the peripheral offers them
    fn write_type(&self) -> WriteType {
        if self.inner.properties.contains(CharPropFlags::WRITE) {
            WriteType::WithResponse
        } else {
            WriteType::WithoutResponse
        }
    }
}

/// [`Transport`] over the first Bluetooth adapter of the system
#[derive(Clone, Debug)]
pub struct BtleTransport {
    scan_timeout: Duration,
}

impl BtleTransport {
    pub fn new(scan_timeout: Duration) -> Self {
        Self { scan_timeout }
    }
}

async fn first_adapter() -> Result<Adapter> {
    let manager = Manager::new()
        .await
        .map_err(|err| LinkError::Unavailable(err.to_string()))?;

    manager
        .adapters()
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| LinkError::Unavailable(NO_ADAPTER_FOUND.into()))
}

async fn local_name(peripheral: &Peripheral) -> Option<String> {
    peripheral
        .properties()
        .await
        .unwrap_or(None)
        .and_then(|properties| properties.local_name)
}

pub(crate) fn found_device(
    filter: &DeviceFilter,
    name: String,
    address: BDAddr,
) -> Option<FoundDevice> {
    filter.matches(&name).then(|| FoundDevice {
        address: address.to_string(),
        name,
    })
}

async fn matching_device(peripheral: &Peripheral, filter: &DeviceFilter) -> Option<FoundDevice> {
    let name = local_name(peripheral).await?;
    found_device(filter, name, peripheral.address())
}

fn announced(event: CentralEvent) -> Option<PeripheralId> {
    match event {
        // Names often only show up in a later update of the advertisement
        CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => Some(id),
        _ => None,
    }
}

async fn find_matching(
    adapter: &Adapter,
    events: &mut CentralEvents,
    filter: &DeviceFilter,
) -> Result<Option<(Peripheral, String)>> {
    // Devices the adapter already knows about won't be announced again
    for peripheral in adapter.peripherals().await? {
        if let Some(device) = matching_device(&peripheral, filter).await {
            return Ok(Some((peripheral, device.name)));
        }
    }

    while let Some(event) = events.next().await {
        let Some(id) = announced(event) else {
            continue;
        };

        let Ok(peripheral) = adapter.peripheral(&id).await else {
            continue;
        };

        if let Some(device) = matching_device(&peripheral, filter).await {
            return Ok(Some((peripheral, device.name)));
        }
    }

    Ok(None)
}

impl Transport for BtleTransport {
    type Device = BtleDevice;
    type Server = GattServer;
    type Service = GattService;
    type Characteristic = GattCharacteristic;

    async fn request_device(&self, filter: &DeviceFilter) -> Result<BtleDevice> {
        let adapter = first_adapter().await?;
        let mut events = adapter.events().await?;

        adapter.start_scan(ScanFilter::default()).await?;
        let found = time::timeout(
            self.scan_timeout,
            find_matching(&adapter, &mut events, filter),
        )
        .await;

        if let Err(err) = adapter.stop_scan().await {
            warn!("Failed to stop scanning: {err}");
        }

        match found {
            Ok(Ok(Some((peripheral, name)))) => Ok(BtleDevice {
                adapter,
                peripheral,
                name,
                optional_services: filter.optional_services.clone(),
            }),
            Ok(Err(err)) => Err(err),
            Ok(Ok(None)) | Err(_) => Err(LinkError::DeviceNotFound(filter.name_prefix.clone())),
        }
    }

    async fn connect_gatt(&self, device: &BtleDevice) -> Result<GattServer> {
        let peripheral = &device.peripheral;

        if !peripheral.is_connected().await? {
            peripheral
                .connect()
                .await
                .map_err(|err| LinkError::GattConnect(err.to_string()))?;
        }

        Ok(GattServer {
            peripheral: peripheral.clone(),
            optional_services: device.optional_services.clone(),
        })
    }

    async fn primary_service(&self, server: &GattServer, uuid: Uuid) -> Result<GattService> {
        if !server.optional_services.contains(&uuid) {
            return Err(LinkError::ServiceNotAllowed(uuid));
        }

        server.peripheral.discover_services().await?;

        server
            .peripheral
            .services()
            .into_iter()
            .find(|service| service.primary && service.uuid == uuid)
            .map(|inner| GattService {
                peripheral: server.peripheral.clone(),
                inner,
            })
            .ok_or(LinkError::ServiceNotFound(uuid))
    }

    async fn characteristic(&self, service: &GattService, uuid: Uuid) -> Result<GattCharacteristic> {
        let inner = service
            .inner
            .characteristics
            .iter()
            .find(|characteristic| characteristic.uuid == uuid)
            .cloned()
            .ok_or(LinkError::CharacteristicNotFound(uuid))?;

        Ok(GattCharacteristic {
            peripheral: service.peripheral.clone(),
            inner,
        })
    }

    async fn write(&self, characteristic: &GattCharacteristic, bytes: &[u8]) -> Result<()> {
        characteristic
            .peripheral
            .write(&characteristic.inner, bytes, characteristic.write_type())
            .await?;

        Ok(())
    }

    async fn is_connected(&self, server: &GattServer) -> Result<bool> {
        Ok(server.peripheral.is_connected().await?)
    }

    async fn disconnect(&self, server: &GattServer) -> Result<()> {
        Ok(server.peripheral.disconnect().await?)
    }

    async fn disconnect_events(&self, device: &BtleDevice) -> Result<DisconnectEvents> {
        let id = device.peripheral.id();
        let events = device.adapter.events().await?;

        Ok(Box::pin(events.filter_map(move |event| {
            let dropped = matches!(&event, CentralEvent::DeviceDisconnected(other) if *other == id);
            future::ready(dropped.then_some(()))
        })))
    }
}

/// Streams every device the filter would select, the ones already known to the adapter first.
/// Stops once no new device showed up for `timeout_seconds`.
pub async fn search_devices(
    filter: &DeviceFilter,
    timeout_seconds: u64,
) -> Result<Pin<Box<dyn Stream<Item = FoundDevice> + Send>>> {
    let adapter = first_adapter().await?;
    let discovery = adapter.events().await?;
    adapter.start_scan(ScanFilter::default()).await?;

    let mut reported = HashSet::new();
    let mut known = Vec::new();

    for peripheral in adapter.peripherals().await? {
        if let Some(device) = matching_device(&peripheral, filter).await {
            reported.insert(peripheral.id());
            known.push(device);
        }
    }

    let timeout = Duration::from_secs(timeout_seconds);
    let deadline = time::Instant::now() + timeout;

    let discovered = stream::unfold(
        (discovery, adapter, filter.clone(), reported, deadline),
        move |(mut discovery, adapter, filter, mut reported, mut deadline)| async move {
            let id = match time::timeout_at(deadline, discovery.next()).await {
                Ok(Some(event)) => announced(event).filter(|id| !reported.contains(id)),
                Ok(None) | Err(_) => {
                    // No more events or timeout reached
                    if let Err(err) = adapter.stop_scan().await {
                        warn!("Failed to stop scanning: {err}");
                    }
                    return None;
                }
            };

            let found = match id {
                Some(id) => match adapter.peripheral(&id).await {
                    Ok(peripheral) => {
                        let found = matching_device(&peripheral, &filter).await;
                        if found.is_some() {
                            reported.insert(id);
                            deadline = time::Instant::now() + timeout;
                        }
                        found
                    }
                    Err(_) => None,
                },
                None => None,
            };

            Some((found, (discovery, adapter, filter, reported, deadline)))
        },
    );

    Ok(Box::pin(stream::iter(known).chain(discovered.filter_map(future::ready))))
}
