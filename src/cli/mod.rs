pub mod check;
pub mod restore;
pub mod run;

pub const SEP: &str = "==============================================================";

pub fn is_root() -> bool {
    unsafe { libc::geteuid() == 0 }
}
