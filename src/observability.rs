use std::net::SocketAddr;

use crate::command::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total commands executed. Labels: command, status.
pub const COMMANDS_TOTAL: &str = "allocd_commands_total";

/// Histogram: command latency in seconds. Labels: command.
pub const COMMAND_DURATION_SECONDS: &str = "allocd_command_duration_seconds";

// ── Domain metrics ──────────────────────────────────────────────

/// Counter: allocations committed.
pub const ALLOCATIONS_CREATED_TOTAL: &str = "allocd_allocations_created_total";

/// Counter: allocations or event edits rejected for overlapping an existing booking.
pub const SCHEDULING_CONFLICTS_TOTAL: &str = "allocd_scheduling_conflicts_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "allocd_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "allocd_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "allocd_connections_rejected_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "allocd_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (changes per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "allocd_wal_flush_batch_size";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), Box<dyn std::error::Error>> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Map a Command variant to a short label for metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::CreateEvent { .. } => "create_event",
        Command::UpdateEvent { .. } => "update_event",
        Command::DeleteEvent { .. } => "delete_event",
        Command::GetEvent { .. } => "get_event",
        Command::ListEvents => "list_events",
        Command::CreateResource { .. } => "create_resource",
        Command::UpdateResource { .. } => "update_resource",
        Command::DeleteResource { .. } => "delete_resource",
        Command::GetResource { .. } => "get_resource",
        Command::ListResources => "list_resources",
        Command::Allocate { .. } => "allocate",
        Command::Deallocate { .. } => "deallocate",
        Command::GetAllocation { .. } => "get_allocation",
        Command::ListAllocations { .. } => "list_allocations",
        Command::FindConflict { .. } => "find_conflict",
        Command::ListConflicts => "list_conflicts",
        Command::Utilization { .. } => "utilization",
    }
}
