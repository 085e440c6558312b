pub mod influx;

pub use influx::InfluxSink;
