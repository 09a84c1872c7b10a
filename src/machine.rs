// DAMONBENCH MACHINE STATE
// HOST-WIDE TOGGLES APPLIED AROUND EVERY RUN:
//   PAGE CACHE DROP  -- ONE-SHOT, NOTHING TO RESTORE
//   SWAP OFF         -- ONE-SHOT, NOT RESTORED (BEST-EFFORT)
//   SMT OFF/ON       -- MUST BE RESTORED ON EVERY EXIT PATH
//
// SMT IS ONLY TOUCHED WHEN IT WAS "on" AT PROBE TIME. A HOST THAT STARTED
// WITH SMT OFF (OR WITHOUT SMT CONTROL) IS LEFT EXACTLY AS FOUND.

use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::error::{BenchError, ExecError, Result};
use crate::exec::{argv, Executor};

pub const DROP_CACHES: &str = "/proc/sys/vm/drop_caches";
pub const SMT_CONTROL: &str = "/sys/devices/system/cpu/smt/control";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SmtControl {
    On,
    Off,
    ForceOff,
    NotSupported,
    NotImplemented,
}

impl SmtControl {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "on" => Some(Self::On),
            "off" => Some(Self::Off),
            "forceoff" => Some(Self::ForceOff),
            "notsupported" => Some(Self::NotSupported),
            "notimplemented" => Some(Self::NotImplemented),
            _ => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::On => "on",
            Self::Off => "off",
            Self::ForceOff => "forceoff",
            Self::NotSupported => "notsupported",
            Self::NotImplemented => "notimplemented",
        }
    }
}

#[derive(Clone, Debug)]
pub struct MachineState {
    smt_control: PathBuf,
    drop_caches: PathBuf,
    smt_at_start: SmtControl,
    smt_disabled: bool,
    swap_disabled: bool,
    cache_drops: u32,
}

impl MachineState {
    // READ THE STARTING SMT STATE. AN UNREADABLE CONTROL FILE IS TREATED AS
    // "NOT IMPLEMENTED": SMT WILL NEVER BE TOUCHED.
    pub fn probe<E: Executor>(exec: &mut E) -> Self {
        Self::probe_at(exec, Path::new(SMT_CONTROL), Path::new(DROP_CACHES))
    }

    pub fn probe_at<E: Executor>(exec: &mut E, smt_control: &Path, drop_caches: &Path) -> Self {
        let smt_at_start = match exec.read(smt_control) {
            Ok(raw) => SmtControl::parse(&raw).unwrap_or_else(|| {
                warn!(value = raw.trim(), "unrecognised SMT control value, SMT left alone");
                SmtControl::NotImplemented
            }),
            Err(e) => {
                warn!(error = %e, "SMT control unreadable, SMT left alone");
                SmtControl::NotImplemented
            }
        };
        debug!(smt = smt_at_start.label(), "machine state probed");
        Self {
            smt_control: smt_control.to_path_buf(),
            drop_caches: drop_caches.to_path_buf(),
            smt_at_start,
            smt_disabled: false,
            swap_disabled: false,
            cache_drops: 0,
        }
    }

    // STATE FOR A RESTORE PATH THAT KNOWS SMT WAS TURNED OFF BY US
    // (TERMINATION HANDLER, `restore` SUBCOMMAND) WITHOUT HAVING PROBED IT
    pub fn owing_smt_restore() -> Self {
        Self {
            smt_control: PathBuf::from(SMT_CONTROL),
            drop_caches: PathBuf::from(DROP_CACHES),
            smt_at_start: SmtControl::On,
            smt_disabled: true,
            swap_disabled: false,
            cache_drops: 0,
        }
    }

    pub fn with_smt_control(mut self, path: &Path) -> Self {
        self.smt_control = path.to_path_buf();
        self
    }

    pub fn smt_at_start(&self) -> SmtControl {
        self.smt_at_start
    }

    pub fn smt_disabled(&self) -> bool {
        self.smt_disabled
    }

    pub fn swap_disabled(&self) -> bool {
        self.swap_disabled
    }

    pub fn cache_drops(&self) -> u32 {
        self.cache_drops
    }

    // FLUSH DIRTY PAGES, THEN DROP PAGE CACHE + DENTRIES + INODES
    pub fn drop_page_cache<E: Executor>(&mut self, exec: &mut E) -> Result<()> {
        exec.run(&argv(["sync"]))
            .map_err(|e| BenchError::setup("sync", e))?;
        exec.write(&self.drop_caches, "3\n")
            .map_err(|e| BenchError::setup("drop page cache", e))?;
        self.cache_drops += 1;
        info!("page cache dropped");
        Ok(())
    }

    pub fn disable_swap<E: Executor>(&mut self, exec: &mut E) -> Result<()> {
        exec.run(&argv(["swapoff", "-a"]))
            .map_err(|e| BenchError::setup("disable swap", e))?;
        if !self.swap_disabled {
            info!("swap disabled");
        }
        self.swap_disabled = true;
        Ok(())
    }

    // RETURNS TRUE WHEN THIS CALL OWES A RESTORE (SMT WAS ON AND NOW IS OFF)
    pub fn disable_smt<E: Executor>(&mut self, exec: &mut E) -> Result<bool> {
        if self.smt_at_start != SmtControl::On {
            debug!(smt = self.smt_at_start.label(), "SMT not on at start, not disabling");
            return Ok(false);
        }
        if self.smt_disabled {
            return Ok(true);
        }
        exec.write(&self.smt_control, "off\n")
            .map_err(|e| BenchError::setup("disable SMT", e))?;
        self.smt_disabled = true;
        info!("SMT disabled");
        Ok(true)
    }

    // IDEMPOTENT. A FAILURE HERE LEAVES THE HOST DEGRADED AND IS FATAL.
    pub fn enable_smt<E: Executor>(&mut self, exec: &mut E) -> Result<()> {
        if !self.smt_disabled {
            return Ok(());
        }
        exec.write(&self.smt_control, "on\n")
            .map_err(|source: ExecError| BenchError::SmtRestore { source })?;
        self.smt_disabled = false;
        info!("SMT re-enabled");
        Ok(())
    }
}
