use std::sync::Arc;
use std::time::Duration;

use netweave_core::NetworkCore;
use netweave_domain::{NetworkResult, NetworkingConfiguration};

use crate::http::{HttpHealthProbe, ReqwestTransport};
use crate::observability::TracingAnalytics;

/// Longest a single health check may take
const HEALTH_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// A [`NetworkCore`] over reqwest with tracing analytics and HTTP health
/// checks. Call `start()` on the result to run the background tasks.
pub fn reqwest_core(config: NetworkingConfiguration) -> NetworkResult<NetworkCore> {
    let transport = ReqwestTransport::from_config(&config)?;
    let probe = HttpHealthProbe::for_transport(&transport, HEALTH_PROBE_TIMEOUT.min(config.timeout));
    NetworkCore::builder(Arc::new(transport))
        .configuration(config)
        .analytics(Arc::new(TracingAnalytics))
        .health_probe(Arc::new(probe))
        .build()
}
