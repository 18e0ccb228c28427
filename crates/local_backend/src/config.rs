use std::{
    fmt,
    fs,
    net::Ipv4Addr,
    path::{
        Path,
        PathBuf,
    },
};

use anyhow::Context;
use clap::Parser;
use common::projects::Project;
use serde::Deserialize;
use url::Url;

#[derive(Parser, Clone)]
#[clap(version, author = "LogBull Team <no-reply@logbull.dev>")]
pub struct LocalConfig {
    /// Host interface to bind to
    #[clap(short, long, default_value = "0.0.0.0")]
    pub interface: Ipv4Addr,

    /// Host port the backend should bind to
    #[clap(short, long, default_value = "4005")]
    pub port: u16,

    /// Base URL of the search backend; omit to store logs in memory
    #[clap(long)]
    pub search_url: Option<Url>,

    /// JSON file of project definitions to serve
    #[clap(long)]
    pub projects_file: Option<PathBuf>,
}

impl fmt::Debug for LocalConfig {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Config")
            .field("interface", &self.interface)
            .field("port", &self.port)
            .field("search_url", &self.search_url)
            .field("projects_file", &self.projects_file)
            .finish()
    }
}

impl LocalConfig {
    pub fn http_bind_address(&self) -> ([u8; 4], u16) {
        (self.interface.octets(), self.port)
    }
}

/// One entry of the `--projects-file` document: project settings plus the
/// optional API key ingest should accept for it.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectSeed {
    #[serde(flatten)]
    pub project: Project,
    #[serde(default)]
    pub api_key: Option<String>,
}

pub fn load_project_seeds(path: &Path) -> anyhow::Result<Vec<ProjectSeed>> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read projects file {}", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse projects file {}", path.display()))
}
