//! Service-level integration tests for the ingestion pipeline.

mod helpers;

mod end_to_end;
mod routing;
