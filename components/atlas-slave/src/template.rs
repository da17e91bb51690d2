use std::path::{Path, PathBuf};
use std::process::Command;

use atlas_core::{Error, Result};
use log::info;

/// The slave's collaborator for keeping a local mirror of the master's
/// template tree up to date. Left as a trait (per the file-sync transport
/// being named but not mandated) so the service manager can be tested
/// without invoking a real `rsync` binary.
pub trait TemplateSync: Send + Sync {
    fn sync(&self) -> Result<()>;
    fn template_dir(&self) -> &Path;
}

/// Default implementation: shells out to `rsync`, mirroring
/// `original_source/slave/template.go`'s `downloadTemplate`, generalised to
/// sync the whole template tree (global layers + every group) in one pass
/// rather than one directory at a time.
pub struct RsyncTemplateSync {
    pub file_server_host: String,
    pub file_server_port: u16,
    pub template_dir: PathBuf,
}

impl RsyncTemplateSync {
    pub fn new(file_server_host: String, file_server_port: u16, template_dir: PathBuf) -> Result<Self> {
        which_rsync()?;
        std::fs::create_dir_all(&template_dir)?;
        Ok(RsyncTemplateSync { file_server_host, file_server_port, template_dir })
    }
}

fn which_rsync() -> Result<()> {
    let found = Command::new("rsync")
        .arg("--version")
        .output()
        .map(|out| out.status.success())
        .unwrap_or(false);
    if !found {
        return Err(Error::Process("rsync is not installed".into()));
    }
    Ok(())
}

impl TemplateSync for RsyncTemplateSync {
    fn sync(&self) -> Result<()> {
        let url = format!("rsync://{}/templates/", self.file_server_host);
        info!("syncing templates from {url}");
        let status = Command::new("rsync")
            .arg("-a")
            .arg("--delete")
            .arg("--port")
            .arg(self.file_server_port.to_string())
            .arg(&url)
            .arg(&self.template_dir)
            .status()
            .map_err(|err| Error::Process(format!("failed to run rsync: {err}")))?;
        if !status.success() {
            return Err(Error::Process(format!("rsync exited with {status}")));
        }
        Ok(())
    }

    fn template_dir(&self) -> &Path {
        &self.template_dir
    }
}
