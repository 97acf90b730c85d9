//! Record-at-a-time transfers.

use std::time::Instant;

use tracing::info;

use crate::core::Datasource;
use crate::error::Result;
use crate::transformer::SharedTransformer;

/// Attach `transformer` to both ends and let the sink pull from the source.
pub(super) async fn run(
    source: &mut dyn Datasource,
    sink: &mut dyn Datasource,
    transformer: SharedTransformer,
) -> Result<u64> {
    let started = Instant::now();
    info!(
        "Streaming {} -> {}",
        source.display_name(),
        sink.display_name()
    );

    if let Some(source) = source.as_transforming() {
        source.set_transformer(transformer.clone());
    }
    if let Some(sink) = sink.as_transforming() {
        sink.set_transformer(transformer);
    }

    let records = sink.stream_write(source).await?;
    info!(
        "Streamed {} records in {:.1}s",
        records,
        started.elapsed().as_secs_f64()
    );
    Ok(records)
}
