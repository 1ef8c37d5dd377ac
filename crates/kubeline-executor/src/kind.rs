//! The closed set of executor kinds and the factory that builds them.

use derive_more::Display;
use std::str::FromStr;

use crate::error::{ExecutorError, ExecutorResult};
use crate::executor::{ExecutorParams, Staged, StageExecutor};
use crate::plugins::{CodeBuild, ExecuteShell, SonarScanner};

/// Plugin kinds with an executor compiled into the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum PluginKind {
    #[display("build_code_to_image")]
    BuildCodeToImage,
    #[display("execute_shell")]
    ExecuteShell,
    #[display("sonar_qube")]
    SonarScanner,
}

impl PluginKind {
    pub const ALL: [PluginKind; 3] = [
        PluginKind::BuildCodeToImage,
        PluginKind::ExecuteShell,
        PluginKind::SonarScanner,
    ];

    /// Catalog key of the plugin this kind executes.
    pub fn key(&self) -> &'static str {
        match self {
            PluginKind::BuildCodeToImage => "build_code_to_image",
            PluginKind::ExecuteShell => "execute_shell",
            PluginKind::SonarScanner => "sonar_qube",
        }
    }
}

impl FromStr for PluginKind {
    type Err = ExecutorError;

    fn from_str(key: &str) -> ExecutorResult<Self> {
        PluginKind::ALL
            .into_iter()
            .find(|kind| kind.key() == key)
            .ok_or_else(|| ExecutorError::UnknownKind(key.to_string()))
    }
}

/// Build the executor for `kind`.
///
/// Fails with a construction error when the parameters cannot be decoded or
/// the working directory cannot be derived. No step has run at that point.
pub fn new_executor(
    kind: PluginKind,
    params: ExecutorParams,
) -> ExecutorResult<Box<dyn StageExecutor>> {
    let executor: Box<dyn StageExecutor> = match kind {
        PluginKind::BuildCodeToImage => {
            Box::new(Staged::new(kind, CodeBuild::new(&params)?, &params))
        }
        PluginKind::ExecuteShell => {
            Box::new(Staged::new(kind, ExecuteShell::new(&params)?, &params))
        }
        PluginKind::SonarScanner => {
            Box::new(Staged::new(kind, SonarScanner::new(&params)?, &params))
        }
    };
    Ok(executor)
}
