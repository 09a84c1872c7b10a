// CHECK SUBCOMMAND
// VERIFIES THE HOST CAN RUN A BENCHMARK: TOOLS ON PATH, MEMCG + DAMON IN THE
// KERNEL, CGROUP V2 WITH THE MEMORY CONTROLLER, A READABLE SMT CONTROL FILE.

use std::io::Read;
use std::path::Path;
use std::process::Command;

use anyhow::Result;

use damonbench::boundary::CGROUP_ROOT;
use damonbench::machine::{SmtControl, SMT_CONTROL};

use super::is_root;

const TOOLS: [&str; 8] = ["sudo", "cgcreate", "cgdelete", "cgexec", "damo", "rg", "swapoff", "sync"];
const KERNEL_OPTIONS: [&str; 2] = ["CONFIG_MEMCG", "CONFIG_DAMON"];

fn check_tool(name: &str) -> bool {
    Command::new("which")
        .arg(name)
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

// y OR m BOTH COUNT
fn config_enabled(config: &str, option: &str) -> bool {
    config.lines().any(|l| {
        l.strip_prefix(option)
            .and_then(|rest| rest.strip_prefix('='))
            .map(|v| v == "y" || v == "m")
            .unwrap_or(false)
    })
}

fn check_kernel_config() -> bool {
    let file = match std::fs::File::open("/proc/config.gz") {
        Ok(f) => f,
        Err(_) => {
            println!("  /proc/config.gz       NOT FOUND (SKIPPED)");
            return true;
        }
    };
    let mut decoder = flate2::read::GzDecoder::new(file);
    let mut config = String::new();
    if decoder.read_to_string(&mut config).is_err() {
        println!("  /proc/config.gz       UNREADABLE (SKIPPED)");
        return true;
    }
    let mut ok = true;
    for option in &KERNEL_OPTIONS {
        if config_enabled(&config, option) {
            println!("  {:<24}OK", option);
        } else {
            println!("  {:<24}NOT FOUND", option);
            ok = false;
        }
    }
    ok
}

fn check_cgroup_v2(root: &Path) -> bool {
    let controllers = root.join("cgroup.controllers");
    match std::fs::read_to_string(&controllers) {
        Ok(c) if c.split_whitespace().any(|w| w == "memory") => {
            println!("  {:<24}OK ({})", "cgroup v2 memory", root.display());
            true
        }
        Ok(_) => {
            println!("  {:<24}MEMORY CONTROLLER NOT ENABLED", "cgroup v2 memory");
            false
        }
        Err(_) => {
            println!("  {:<24}NOT MOUNTED AT {}", "cgroup v2", root.display());
            false
        }
    }
}

fn check_smt() -> bool {
    let raw = std::fs::read_to_string(SMT_CONTROL).unwrap_or_default();
    match SmtControl::parse(&raw) {
        Some(s) => {
            println!("  {:<24}{}", "smt control", s.label().to_uppercase());
            true
        }
        None => {
            println!("  {:<24}UNREADABLE (SMT WILL NOT BE TOGGLED)", "smt control");
            false
        }
    }
}

pub fn run_check() -> Result<()> {
    println!("DAMONBENCH DEPENDENCY CHECK");
    println!();

    let mut ok = true;
    for tool in &TOOLS {
        if check_tool(tool) {
            println!("  {:<24}OK", tool);
        } else if *tool == "sudo" && is_root() {
            println!("  {:<24}MISSING (RUNNING AS ROOT, USE --no-sudo)", tool);
        } else {
            println!("  {:<24}MISSING", tool);
            ok = false;
        }
    }
    println!();

    println!("KERNEL CONFIG:");
    if !check_kernel_config() {
        ok = false;
    }
    println!();

    println!("HOST:");
    if !check_cgroup_v2(Path::new(CGROUP_ROOT)) {
        ok = false;
    }
    // MISSING SMT CONTROL IS A WARNING, NOT A FAILURE
    check_smt();
    println!();

    if ok {
        println!("ALL CHECKS PASSED");
    } else {
        println!("SOME CHECKS FAILED");
        if !check_tool("cgcreate") || !check_tool("cgexec") {
            println!("  Install libcgroup tools: apt install cgroup-tools");
        }
        if !check_tool("damo") {
            println!("  Install damo: pip install damo");
        }
        if !check_tool("rg") {
            println!("  Install ripgrep: apt install ripgrep");
        }
        std::process::exit(1);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kernel_option_lookup() {
        let config = "# CONFIG_FOO is not set\nCONFIG_MEMCG=y\nCONFIG_DAMON_VADDR=y\nCONFIG_DAMON=m\n";
        assert!(config_enabled(config, "CONFIG_MEMCG"));
        assert!(config_enabled(config, "CONFIG_DAMON"));
        assert!(!config_enabled(config, "CONFIG_FOO"));
        assert!(!config_enabled("CONFIG_DAMON_VADDR=y\n", "CONFIG_DAMON"));
    }
}
