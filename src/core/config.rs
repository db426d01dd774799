// This module holds the configuration of a JIT instance. JitConfig selects the target ABI
// (System V is the only one with call marshaling; Win64 is recognised so that it can be
// rejected explicitly), the optional append-only diagnostic log file, the optional directory for
// raw-code dumps and the tiler options. Configuration is read once at instance creation,
// normally from EXPRJIT_* environment variables, and stays fixed for the instance lifetime.

//! JIT configuration.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use crate::tiler::TilerOptions;

/// Calling convention family of the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TargetAbi {
    #[default]
    SysV,
    Win64,
}

impl FromStr for TargetAbi {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sysv" | "systemv" => Ok(TargetAbi::SysV),
            "win64" | "windows" => Ok(TargetAbi::Win64),
            other => Err(format!("unknown ABI '{other}'")),
        }
    }
}

/// Settings for one JIT instance.
#[derive(Debug, Clone, Default)]
pub struct JitConfig {
    pub abi: TargetAbi,
    /// Append-only diagnostic log.
    pub log_path: Option<PathBuf>,
    /// Directory receiving an ELF dump of every compiled code object.
    pub dump_dir: Option<PathBuf>,
    pub tiler: TilerOptions,
}

impl JitConfig {
    pub const ENV_LOG: &'static str = "EXPRJIT_LOG";
    pub const ENV_DUMP: &'static str = "EXPRJIT_DUMP";
    pub const ENV_ABI: &'static str = "EXPRJIT_ABI";
    pub const ENV_MIRROR_LEFT_STATE: &'static str = "EXPRJIT_MIRROR_LEFT_STATE";

    /// Read configuration from the environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Read configuration through an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = JitConfig::default();
        if let Some(path) = lookup(Self::ENV_LOG).filter(|p| !p.is_empty()) {
            config.log_path = Some(PathBuf::from(path));
        }
        if let Some(dir) = lookup(Self::ENV_DUMP).filter(|p| !p.is_empty()) {
            config.dump_dir = Some(PathBuf::from(dir));
        }
        if let Some(abi) = lookup(Self::ENV_ABI) {
            match abi.parse() {
                Ok(abi) => config.abi = abi,
                Err(err) => log::warn!("{}: {err}, keeping {:?}", Self::ENV_ABI, config.abi),
            }
        }
        if let Some(flag) = lookup(Self::ENV_MIRROR_LEFT_STATE) {
            config.tiler.mirror_left_state = matches!(flag.as_str(), "1" | "true" | "yes");
        }
        config
    }
}
