//! `mdq resolve <id> overwrite|discard` – answer a file conflict in the running session.

use anyhow::Result;
use mdq_core::conflict::ConflictDecision;
use mdq_core::job::JobId;
use mdq_core::paths::StateLayout;

use crate::cli::control_socket::{self, ControlRequest};

pub async fn run_resolve(id: JobId, decision: ConflictDecision) -> Result<()> {
    let socket = StateLayout::default_location()?.control_socket();
    control_socket::send_request(&socket, ControlRequest::Resolve(id, decision)).await?;
    println!("Job {id}: {decision}");
    Ok(())
}
