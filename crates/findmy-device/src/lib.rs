pub mod codec;
pub mod error;
pub mod ingest;
pub mod link;
pub mod manager;
pub mod model;
pub mod monitor;
pub mod publisher;
pub mod registry;
pub mod relay;
pub mod sensor;
pub mod store;

pub use codec::{encode, normalize, normalize_value, DecodeError};
pub use error::{DeviceError, Result};
pub use ingest::{IngestHandle, IngestReport, Ingestor, Payload, Source};
pub use link::{import_link, scan_payload, share_link, LinkImport, SHARE_PARAM};
pub use manager::{DeviceManager, ManagerOptions, SyncSummary};
pub use model::{default_name, Battery, DeviceRecord, Location};
pub use monitor::SensorMonitor;
pub use publisher::{generate_device_id, SelfDevicePublisher};
pub use registry::{MergeMode, Registry, RegistryEvent, UpsertOutcome};
pub use relay::{NoopRelay, Relay};
pub use sensor::{
    BatterySensor, FixedLocation, LocationSensor, NoBattery, NoLocation, SensorReading,
    SysfsBattery,
};
pub use store::{FileStore, KeyValueStore, MemoryStore, DEVICES_ENTRY, DEVICE_ID_ENTRY};
