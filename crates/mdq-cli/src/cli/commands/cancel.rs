//! `mdq cancel <id>` – cancel a job in the running session.

use anyhow::Result;
use mdq_core::job::JobId;
use mdq_core::paths::StateLayout;

use crate::cli::control_socket::{self, ControlRequest};

pub async fn run_cancel(id: JobId) -> Result<()> {
    let socket = StateLayout::default_location()?.control_socket();
    control_socket::send_request(&socket, ControlRequest::Cancel(id)).await?;
    println!("Cancel requested for job {id}");
    Ok(())
}
