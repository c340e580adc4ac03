use std::net::{IpAddr, Ipv6Addr, SocketAddr};

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Installs the global Prometheus recorder and serves it on `[::]:{port}/metrics`.
///
/// Must be called from within a Tokio runtime, which drives the HTTP listener.
pub fn init_metrics(port: u16, service_name: Option<&str>) -> Result<(), BuildError> {
    let mut builder = PrometheusBuilder::new()
        .with_http_listener(SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), port));

    if let Some(service_name) = service_name {
        builder = builder.add_global_label("service", service_name);
    }

    builder.install()?;

    Ok(())
}
