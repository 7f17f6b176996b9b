//! Backend driven by an external program over newline-delimited JSON.
//!
//! # Process Management
//!
//! - **Lazy startup**: the program is spawned on the first request
//! - **One request at a time**: stdin/stdout sit behind a mutex
//! - **Restart on failure**: a dead or desynchronised process is dropped
//!   and respawned by the next request
//! - **Generations**: model handles belong to the process that issued
//!   them; after a restart, old handles are dead and never sent again
//!
//! stderr is inherited, so backend diagnostics land in the job's log.
//!
//! # Wire Format
//!
//! One JSON object per line in each direction. Requests carry an `id` and
//! an `op`; the reply echoes the id and holds either `ok` or `error`:
//!
//! ```json
//! {"id":1,"op":"resample","features":{"rows":2,"cols":1,"data":[0.1,0.2]},"targets":[40.0,80.0],
//!  "relevance":[0.01,0.99],"spec":{...},"seed":17}
//! {"id":1,"ok":{"features":{...},"targets":[40.0,80.0,80.0]}}
//!
//! {"id":2,"op":"fit","regressor":{"kind":"random-forest","n_estimators":10},"seed":17,
//!  "features":{...},"targets":[...]}
//! {"id":2,"ok":{"handle":0}}
//!
//! {"id":3,"op":"predict","handle":0,"features":{...}}
//! {"id":3,"ok":[41.2,77.9]}
//!
//! {"id":4,"op":"save","handle":0,"path":"results/final/RO_13.model"}
//! {"id":4,"ok":null}
//!
//! {"id":5,"op":"release","handle":0}
//! {"id":5,"ok":null}
//! ```
//!
//! Ensembles use `fit-ensemble` with an `ensemble` spec and a `relevance`
//! array, and are predicted and released like any other handle.

use std::io::{BufRead, BufReader, Write};
use std::path::Path;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use super::{Backend, EnsembleRegressor, Regressor, ResampleRequest, Resampled};
use crate::error::BackendError;
use crate::sweep::strategy::{EnsembleSpec, RegressorSpec};
use crate::types::Matrix;

#[derive(Serialize)]
#[serde(tag = "op", rename_all = "kebab-case")]
enum Request<'a> {
    Resample(&'a ResampleRequest<'a>),
    Fit {
        regressor: &'a RegressorSpec,
        seed: u64,
        features: &'a Matrix,
        targets: &'a [f64],
    },
    FitEnsemble {
        ensemble: &'a EnsembleSpec,
        seed: u64,
        features: &'a Matrix,
        targets: &'a [f64],
        relevance: &'a [f64],
    },
    Predict {
        handle: u64,
        features: &'a Matrix,
    },
    Save {
        handle: u64,
        path: &'a Path,
    },
    Release {
        handle: u64,
    },
}

#[derive(Serialize)]
struct Envelope<'a> {
    id: u64,
    #[serde(flatten)]
    request: Request<'a>,
}

#[derive(Deserialize)]
struct Reply {
    id: u64,
    #[serde(default)]
    ok: Option<serde_json::Value>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Deserialize)]
struct Fitted {
    handle: u64,
}

struct Session {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
    next_id: u64,
    generation: u64,
}

/// A model handle and the session generation that issued it.
#[derive(Debug, Clone, Copy)]
struct Handle {
    id: u64,
    generation: u64,
}

impl Session {
    fn exchange(&mut self, request: Request<'_>) -> Result<serde_json::Value, BackendError> {
        let id = self.next_id;
        self.next_id += 1;

        let mut line = serde_json::to_string(&Envelope { id, request })
            .map_err(|e| BackendError::Protocol(format!("cannot encode request: {e}")))?;
        line.push('\n');
        self.stdin.write_all(line.as_bytes())?;
        self.stdin.flush()?;

        let mut response = String::new();
        if self.stdout.read_line(&mut response)? == 0 {
            let status = self
                .child
                .wait()
                .map(|s| s.to_string())
                .unwrap_or_else(|e| format!("unknown status ({e})"));
            return Err(BackendError::Exit { status });
        }
        trace!(id, bytes = response.len(), "backend reply");

        let reply: Reply = serde_json::from_str(response.trim_end())
            .map_err(|e| BackendError::Protocol(format!("unparseable reply: {e}")))?;
        if reply.id != id {
            return Err(BackendError::Protocol(format!(
                "reply id {} does not match request id {id}",
                reply.id
            )));
        }
        match (reply.ok, reply.error) {
            (_, Some(message)) => Err(BackendError::Rejected(message)),
            (Some(value), None) => Ok(value),
            (None, None) => Ok(serde_json::Value::Null),
        }
    }

    fn shutdown(mut self) {
        // Closing stdin is the stop signal
        drop(self.stdin);
        if let Err(e) = self.child.wait() {
            warn!(error = %e, "failed to reap backend process");
        }
    }
}

/// Runs `program args...` and talks to it over stdin/stdout.
pub struct ProcessBackend {
    program: String,
    args: Vec<String>,
    session: Mutex<Option<Session>>,
    spawned: AtomicU64,
}

impl ProcessBackend {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            session: Mutex::new(None),
            spawned: AtomicU64::new(0),
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    fn lock(&self) -> Result<MutexGuard<'_, Option<Session>>, BackendError> {
        self.session
            .lock()
            .map_err(|_| BackendError::Protocol("backend session lock poisoned".into()))
    }

    fn spawn(&self) -> Result<Session, BackendError> {
        debug!(program = %self.program, args = ?self.args, "starting backend");
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|source| BackendError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            let _ = child.kill();
            return Err(BackendError::Protocol("backend stdio was not captured".into()));
        };

        let generation = self.spawned.fetch_add(1, Ordering::Relaxed) + 1;
        Ok(Session {
            child,
            stdin,
            stdout: BufReader::new(stdout),
            next_id: 1,
            generation,
        })
    }

    /// Send a request, spawning the program if no session is live.
    fn call<T: DeserializeOwned>(&self, request: Request<'_>) -> Result<(T, u64), BackendError> {
        self.call_in(None, request)
    }

    /// Send a request about an existing handle. Fails without spawning if
    /// the session that issued the handle is gone.
    fn call_on<T: DeserializeOwned>(
        &self,
        handle: Handle,
        request: Request<'_>,
    ) -> Result<T, BackendError> {
        self.call_in(Some(handle.generation), request)
            .map(|(value, _)| value)
    }

    fn call_in<T: DeserializeOwned>(
        &self,
        generation: Option<u64>,
        request: Request<'_>,
    ) -> Result<(T, u64), BackendError> {
        let mut guard = self.lock()?;
        let live = guard.as_ref().map(|s| s.generation);
        match (generation, live) {
            (None, None) => *guard = Some(self.spawn()?),
            (Some(wanted), live) if live != Some(wanted) => {
                return Err(BackendError::Protocol(format!(
                    "model from backend generation {wanted} was lost when the backend restarted"
                )));
            }
            _ => {}
        }
        let Some(session) = guard.as_mut() else {
            return Err(BackendError::Protocol("backend session missing".into()));
        };
        let generation = session.generation;

        match session.exchange(request) {
            Ok(value) => serde_json::from_value(value)
                .map(|v| (v, generation))
                .map_err(|e| BackendError::Protocol(format!("unexpected reply shape: {e}"))),
            // The backend answered; the session is still in sync
            Err(err @ BackendError::Rejected(_)) => Err(err),
            Err(err) => {
                if let Some(dead) = guard.take() {
                    dead.shutdown();
                }
                Err(err)
            }
        }
    }

    fn release(&self, handle: Handle) {
        let request = Request::Release { handle: handle.id };
        if let Err(e) = self.call_on::<serde_json::Value>(handle, request) {
            debug!(handle = handle.id, error = %e, "failed to release backend model");
        }
    }
}

impl Drop for ProcessBackend {
    fn drop(&mut self) {
        let session = match self.session.get_mut() {
            Ok(slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(session) = session {
            session.shutdown();
        }
    }
}

impl Backend for ProcessBackend {
    fn resample(&self, request: &ResampleRequest<'_>) -> Result<Resampled, BackendError> {
        let (resampled, _): (Resampled, _) = self.call(Request::Resample(request))?;
        if resampled.features.nrows() != resampled.targets.len() {
            return Err(BackendError::Protocol(format!(
                "resampled {} rows but {} targets",
                resampled.features.nrows(),
                resampled.targets.len()
            )));
        }
        Ok(resampled)
    }

    fn regressor(
        &self,
        spec: &RegressorSpec,
        seed: u64,
    ) -> Result<Box<dyn Regressor + '_>, BackendError> {
        Ok(Box::new(RemoteModel {
            backend: self,
            kind: RemoteKind::Single(spec.clone()),
            seed,
            handle: None,
        }))
    }

    fn ensemble(
        &self,
        spec: &EnsembleSpec,
        seed: u64,
    ) -> Result<Box<dyn EnsembleRegressor + '_>, BackendError> {
        Ok(Box::new(RemoteModel {
            backend: self,
            kind: RemoteKind::Ensemble(spec.clone()),
            seed,
            handle: None,
        }))
    }
}

enum RemoteKind {
    Single(RegressorSpec),
    Ensemble(EnsembleSpec),
}

/// A model living inside the backend process, addressed by handle.
struct RemoteModel<'a> {
    backend: &'a ProcessBackend,
    kind: RemoteKind,
    seed: u64,
    handle: Option<Handle>,
}

impl RemoteModel<'_> {
    fn fit_request(
        &mut self,
        features: &Matrix,
        targets: &[f64],
        relevance: Option<&[f64]>,
    ) -> Result<(), BackendError> {
        if let Some(old) = self.handle.take() {
            self.backend.release(old);
        }
        let request = match (&self.kind, relevance) {
            (RemoteKind::Single(spec), _) => Request::Fit {
                regressor: spec,
                seed: self.seed,
                features,
                targets,
            },
            (RemoteKind::Ensemble(spec), Some(relevance)) => Request::FitEnsemble {
                ensemble: spec,
                seed: self.seed,
                features,
                targets,
                relevance,
            },
            (RemoteKind::Ensemble(_), None) => {
                return Err(BackendError::Protocol("ensemble fit needs relevance".into()));
            }
        };
        let (fitted, generation): (Fitted, _) = self.backend.call(request)?;
        self.handle = Some(Handle {
            id: fitted.handle,
            generation,
        });
        Ok(())
    }

    fn fitted(&self, what: &str) -> Result<Handle, BackendError> {
        self.handle
            .ok_or_else(|| BackendError::Protocol(format!("{what} called before fit")))
    }

    fn predict_request(&self, features: &Matrix) -> Result<Vec<f64>, BackendError> {
        let handle = self.fitted("predict")?;
        let request = Request::Predict {
            handle: handle.id,
            features,
        };
        let predictions: Vec<f64> = self.backend.call_on(handle, request)?;
        if predictions.len() != features.nrows() {
            return Err(BackendError::Protocol(format!(
                "{} predictions for {} rows",
                predictions.len(),
                features.nrows()
            )));
        }
        Ok(predictions)
    }

    fn save_request(&self, path: &Path) -> Result<(), BackendError> {
        let handle = self.fitted("save")?;
        let request = Request::Save {
            handle: handle.id,
            path,
        };
        self.backend.call_on::<serde_json::Value>(handle, request)?;
        Ok(())
    }
}

impl Drop for RemoteModel<'_> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.backend.release(handle);
        }
    }
}

impl Regressor for RemoteModel<'_> {
    fn fit(&mut self, features: &Matrix, targets: &[f64]) -> Result<(), BackendError> {
        self.fit_request(features, targets, None)
    }

    fn predict(&self, features: &Matrix) -> Result<Vec<f64>, BackendError> {
        self.predict_request(features)
    }

    fn save(&self, path: &Path) -> Result<(), BackendError> {
        self.save_request(path)
    }
}

impl EnsembleRegressor for RemoteModel<'_> {
    fn fit(
        &mut self,
        features: &Matrix,
        targets: &[f64],
        relevance: &[f64],
    ) -> Result<(), BackendError> {
        self.fit_request(features, targets, Some(relevance))
    }

    fn predict(&self, features: &Matrix) -> Result<Vec<f64>, BackendError> {
        self.predict_request(features)
    }

    fn save(&self, path: &Path) -> Result<(), BackendError> {
        self.save_request(path)
    }
}
