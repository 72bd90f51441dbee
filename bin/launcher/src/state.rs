use std::path::PathBuf;
use std::sync::OnceLock;

use cluster_client::entities::manifest::{compute_basedir, compute_configdir};
use tokio::sync::Mutex;

use crate::config::launcher_config;
use crate::executor::ActiveWork;

/// This rank's `basedir`, computed once at startup from local identity
/// only (`workdir`/`user`/`fqdn`/`pid`) — it does not depend on any value
/// exchanged with peers.
pub fn basedir() -> &'static PathBuf {
  static BASEDIR: OnceLock<PathBuf> = OnceLock::new();
  BASEDIR.get_or_init(|| {
    let config = launcher_config();
    compute_basedir(
      &config.workdir,
      &whoami_user(),
      &local_fqdn(),
      std::process::id(),
    )
  })
}

pub fn configdir() -> &'static PathBuf {
  static CONFIGDIR: OnceLock<PathBuf> = OnceLock::new();
  CONFIGDIR.get_or_init(|| compute_configdir(basedir()))
}

/// Every [`ActiveWork`] this rank is currently driving through its
/// lifecycle. The supervisor loop (C7) is the only reader/writer once
/// startup has seeded it.
pub fn active_work() -> &'static Mutex<Vec<ActiveWork>> {
  static ACTIVE_WORK: OnceLock<Mutex<Vec<ActiveWork>>> = OnceLock::new();
  ACTIVE_WORK.get_or_init(|| Mutex::new(Vec::new()))
}

pub fn local_fqdn() -> String {
  hostname_from_uname().unwrap_or_else(|| "localhost".to_string())
}

pub fn whoami_user() -> String {
  std::env::var("USER")
    .or_else(|_| std::env::var("LOGNAME"))
    .unwrap_or_else(|_| "unknown".to_string())
}

fn hostname_from_uname() -> Option<String> {
  let mut buf = [0u8; 256];
  let ret = unsafe {
    libc::gethostname(buf.as_mut_ptr() as *mut libc::c_char, buf.len())
  };
  if ret != 0 {
    return None;
  }
  let len = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
  std::str::from_utf8(&buf[..len]).ok().map(str::to_string)
}
