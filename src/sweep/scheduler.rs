//! Hand-off of job descriptors to a batch scheduler.
//!
//! A scheduler receives a ticket (job key, descriptor path, log directory)
//! and arranges for `<worker> run-job <descriptor>` to run somewhere. It
//! never waits for the job. What it returns is an opaque submission id for
//! the manifest.
//!
//! ```text
//! PbsScheduler    write <scripts>/<KEY>.sh  →  qsub <KEY>.sh  →  "1234.cluster"
//! LocalScheduler  spawn worker in background →  "pid:5678"
//! ```

use std::fmt::Write as _;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::types::JobKey;

/// What the scheduler needs to launch one job.
#[derive(Debug, Clone, Copy)]
pub struct JobTicket<'a> {
    pub key: &'a JobKey,
    pub descriptor: &'a Path,
    pub log_dir: &'a Path,
}

pub trait Scheduler {
    /// Submit without waiting. Returns the scheduler's id for the job.
    fn submit(&self, ticket: &JobTicket<'_>) -> Result<String>;

    fn name(&self) -> &'static str;
}

/// Scheduler choice and options, as configured.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum SchedulerConfig {
    #[serde(rename_all = "kebab-case")]
    Pbs {
        #[serde(default = "default_submit")]
        submit: String,
        #[serde(default = "default_resources")]
        resources: String,
        #[serde(default)]
        walltime: Option<String>,
        #[serde(default)]
        queue: Option<String>,
        /// Address for begin/abort/end notifications.
        #[serde(default)]
        mail: Option<String>,
    },
    Local,
}

fn default_submit() -> String {
    "qsub".into()
}

fn default_resources() -> String {
    "nodes=1:ppn=1".into()
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        SchedulerConfig::Pbs {
            submit: default_submit(),
            resources: default_resources(),
            walltime: None,
            queue: None,
            mail: None,
        }
    }
}

impl SchedulerConfig {
    /// Build the scheduler. `worker` is the binary providing `run-job`,
    /// `working_dir` the directory jobs start in.
    pub fn build(&self, worker: PathBuf, working_dir: PathBuf) -> Box<dyn Scheduler> {
        match self {
            SchedulerConfig::Pbs {
                submit,
                resources,
                walltime,
                queue,
                mail,
            } => Box::new(PbsScheduler {
                submit: submit.clone(),
                resources: resources.clone(),
                walltime: walltime.clone(),
                queue: queue.clone(),
                mail: mail.clone(),
                worker,
                working_dir,
            }),
            SchedulerConfig::Local => Box::new(LocalScheduler { worker }),
        }
    }
}

/// Portable Batch System: one script per job, submitted with `qsub`.
#[derive(Debug, Clone)]
pub struct PbsScheduler {
    pub submit: String,
    pub resources: String,
    pub walltime: Option<String>,
    pub queue: Option<String>,
    pub mail: Option<String>,
    pub worker: PathBuf,
    pub working_dir: PathBuf,
}

impl PbsScheduler {
    /// The batch script for one job.
    pub fn script(&self, ticket: &JobTicket<'_>) -> String {
        let key = ticket.key;
        let mut s = String::from("#!/bin/bash\n");
        let _ = writeln!(s, "#PBS -N {key}");
        let _ = writeln!(s, "#PBS -l {}", self.resources);
        if let Some(walltime) = &self.walltime {
            let _ = writeln!(s, "#PBS -l walltime={walltime}");
        }
        if let Some(queue) = &self.queue {
            let _ = writeln!(s, "#PBS -q {queue}");
        }
        if let Some(mail) = &self.mail {
            let _ = writeln!(s, "#PBS -m abe");
            let _ = writeln!(s, "#PBS -M {mail}");
        }
        let _ = writeln!(s, "#PBS -o {}", ticket.log_dir.join(format!("{key}.out")).display());
        let _ = writeln!(s, "#PBS -e {}", ticket.log_dir.join(format!("{key}.err")).display());
        s.push('\n');
        let _ = writeln!(s, "cd {}", shell_quote(&self.working_dir));
        s.push('\n');
        let _ = writeln!(
            s,
            "{} run-job {}",
            shell_quote(&self.worker),
            shell_quote(ticket.descriptor)
        );
        s
    }
}

impl Scheduler for PbsScheduler {
    fn submit(&self, ticket: &JobTicket<'_>) -> Result<String> {
        fs::create_dir_all(ticket.log_dir)
            .map_err(|e| Error::io(format!("creating {}", ticket.log_dir.display()), e))?;

        let script_path = ticket.descriptor.with_extension("sh");
        fs::write(&script_path, self.script(ticket))
            .map_err(|e| Error::io(format!("writing {}", script_path.display()), e))?;

        let output = Command::new(&self.submit)
            .arg(&script_path)
            .output()
            .map_err(|e| Error::Scheduler(format!("failed to run `{}`: {e}", self.submit)))?;

        if !output.status.success() {
            return Err(Error::Scheduler(format!(
                "`{} {}` exited with {}: {}",
                self.submit,
                script_path.display(),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let id = String::from_utf8_lossy(&output.stdout).trim().to_string();
        debug!(key = %ticket.key, id = %id, "submitted to PBS");
        Ok(id)
    }

    fn name(&self) -> &'static str {
        "pbs"
    }
}

/// Runs each job as a detached background process on this host.
#[derive(Debug, Clone)]
pub struct LocalScheduler {
    pub worker: PathBuf,
}

impl Scheduler for LocalScheduler {
    fn submit(&self, ticket: &JobTicket<'_>) -> Result<String> {
        fs::create_dir_all(ticket.log_dir)
            .map_err(|e| Error::io(format!("creating {}", ticket.log_dir.display()), e))?;

        let log = |ext: &str| -> Result<File> {
            let path = ticket.log_dir.join(format!("{}.{ext}", ticket.key));
            File::create(&path).map_err(|e| Error::io(format!("creating {}", path.display()), e))
        };

        let child = Command::new(&self.worker)
            .arg("run-job")
            .arg(ticket.descriptor)
            .stdin(Stdio::null())
            .stdout(log("out")?)
            .stderr(log("err")?)
            .spawn()
            .map_err(|e| {
                Error::Scheduler(format!("failed to start {}: {e}", self.worker.display()))
            })?;

        info!(key = %ticket.key, pid = child.id(), "started local worker");
        Ok(format!("pid:{}", child.id()))
    }

    fn name(&self) -> &'static str {
        "local"
    }
}

/// Single-quote a path for a POSIX shell.
fn shell_quote(path: &Path) -> String {
    let s = path.to_string_lossy();
    if !s.is_empty()
        && s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "/._-+=:,@".contains(c))
    {
        return s.into_owned();
    }
    format!("'{}'", s.replace('\'', r"'\''"))
}

#[cfg(test)]
pub(crate) mod testing {
    use std::cell::RefCell;

    use super::*;

    /// Records tickets instead of submitting them.
    #[derive(Default)]
    pub(crate) struct RecordingScheduler {
        pub submitted: RefCell<Vec<(JobKey, PathBuf)>>,
    }

    impl Scheduler for RecordingScheduler {
        fn submit(&self, ticket: &JobTicket<'_>) -> Result<String> {
            let mut submitted = self.submitted.borrow_mut();
            submitted.push((ticket.key.clone(), ticket.descriptor.to_path_buf()));
            Ok(format!("job-{}", submitted.len()))
        }

        fn name(&self) -> &'static str {
            "recording"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pbs(mail: Option<&str>) -> PbsScheduler {
        PbsScheduler {
            submit: "qsub".into(),
            resources: "nodes=1:ppn=1".into(),
            walltime: None,
            queue: None,
            mail: mail.map(String::from),
            worker: PathBuf::from("/opt/bin/resweep"),
            working_dir: PathBuf::from("/home/lab/sweep"),
        }
    }

    #[test]
    fn test_pbs_script_layout() {
        let key = JobKey::new("RO", 8);
        let ticket = JobTicket {
            key: &key,
            descriptor: Path::new("/home/lab/sweep/hpc/jobs/RO_8.json"),
            log_dir: Path::new("/home/lab/sweep/hpc/logs"),
        };
        let script = pbs(Some("lab@example.org")).script(&ticket);

        assert!(script.starts_with("#!/bin/bash\n#PBS -N RO_8\n"));
        assert!(script.contains("#PBS -l nodes=1:ppn=1\n"));
        assert!(script.contains("#PBS -m abe\n#PBS -M lab@example.org\n"));
        assert!(script.contains("#PBS -o /home/lab/sweep/hpc/logs/RO_8.out\n"));
        assert!(script.contains("#PBS -e /home/lab/sweep/hpc/logs/RO_8.err\n"));
        assert!(script.contains("cd /home/lab/sweep\n"));
        assert!(script.ends_with("/opt/bin/resweep run-job /home/lab/sweep/hpc/jobs/RO_8.json\n"));
    }

    #[test]
    fn test_pbs_script_without_mail() {
        let key = JobKey::new("GN", 0);
        let ticket = JobTicket {
            key: &key,
            descriptor: Path::new("jobs/GN_0.json"),
            log_dir: Path::new("logs"),
        };
        let script = pbs(None).script(&ticket);
        assert!(!script.contains("#PBS -m"));
        assert!(!script.contains("#PBS -M"));
    }

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote(Path::new("/a/b.json")), "/a/b.json");
        assert_eq!(shell_quote(Path::new("/my dir/x")), "'/my dir/x'");
        assert_eq!(shell_quote(Path::new("it's")), r"'it'\''s'");
    }

    #[cfg(unix)]
    #[test]
    fn test_failed_submission_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let mut scheduler = pbs(None);
        scheduler.submit = "false".into();
        let key = JobKey::new("RO", 1);
        let descriptor = dir.path().join("RO_1.json");
        let ticket = JobTicket {
            key: &key,
            descriptor: &descriptor,
            log_dir: &dir.path().join("logs"),
        };
        let err = scheduler.submit(&ticket).unwrap_err();
        assert!(matches!(err, Error::Scheduler(_)), "got {err}");
        // The script is still written for inspection
        assert!(dir.path().join("RO_1.sh").is_file());
    }

    #[test]
    fn test_scheduler_config_from_toml() {
        let cfg: SchedulerConfig = toml::from_str(
            r#"
            kind = "pbs"
            mail = "lab@example.org"
            walltime = "04:00:00"
            "#,
        )
        .unwrap();
        assert_eq!(
            cfg,
            SchedulerConfig::Pbs {
                submit: "qsub".into(),
                resources: "nodes=1:ppn=1".into(),
                walltime: Some("04:00:00".into()),
                queue: None,
                mail: Some("lab@example.org".into()),
            }
        );
        let local: SchedulerConfig = toml::from_str(r#"kind = "local""#).unwrap();
        assert_eq!(local, SchedulerConfig::Local);
    }
}
