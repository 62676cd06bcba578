//! C5: the background compilation scheduler.
//!
//! A bounded pool of `std::thread` workers pulls compile jobs off a
//! `crossbeam_channel::bounded` queue (the same channel-plus-worker-threads
//! shape the sibling pack repo `MystenLabs-sui` uses throughout), compiles
//! them with `CraneliftCompiler`, and publishes the result into a shared map
//! the interpreter consults on every `CALL`. A function fails to compile at
//! most once: failure is logged and the function is never resubmitted
//! (spec.md §4.5 — non-fatal, permanent interpreter fallback).

use crate::bytecode::BytecodeModule;
use crate::jit::codegen::CraneliftCompiler;
use crate::jit::executor::CompiledExecutor;
use crossbeam_channel::{bounded, Receiver, Sender};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::thread::JoinHandle;
use std::time::Duration;

/// JIT tuning, overridable from the environment at `Vm::new` (spec.md §6
/// expansion). `LANGVM_JIT_THRESHOLD` and `LANGVM_JIT_WORKERS` override the
/// defaults when set and parse as a positive integer.
#[derive(Debug, Clone, Copy)]
pub struct JitConfig {
    pub enabled: bool,
    pub threshold: u64,
    pub worker_count: usize,
}

impl Default for JitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold: 1000,
            worker_count: default_worker_count(),
        }
    }
}

fn default_worker_count() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .min(4)
}

impl JitConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(v) = std::env::var("LANGVM_JIT_THRESHOLD") {
            if let Ok(n) = v.parse::<u64>() {
                if n > 0 {
                    config.threshold = n;
                }
            }
        }
        if let Ok(v) = std::env::var("LANGVM_JIT_WORKERS") {
            if let Ok(n) = v.parse::<usize>() {
                if n > 0 {
                    config.worker_count = n;
                }
            }
        }
        config
    }
}

struct CompileJob {
    func_index: u32,
}

/// Owns the worker threads, the in-progress set, and the publish map. Lives
/// for the whole `Vm` lifetime; `shutdown` is called on drop.
#[derive(Debug)]
pub struct Scheduler {
    sender: Option<Sender<CompileJob>>,
    workers: Vec<JoinHandle<()>>,
    in_progress: Arc<Mutex<HashSet<u32>>>,
    failed: Arc<Mutex<HashSet<u32>>>,
    published: Arc<RwLock<std::collections::HashMap<u32, Arc<dyn CompiledExecutor>>>>,
    shutdown_requested: Arc<AtomicBool>,
}

impl Scheduler {
    pub fn new(module: Arc<BytecodeModule>, config: JitConfig) -> Self {
        let (sender, receiver) = bounded::<CompileJob>(256);
        let in_progress = Arc::new(Mutex::new(HashSet::new()));
        let failed = Arc::new(Mutex::new(HashSet::new()));
        let published = Arc::new(RwLock::new(std::collections::HashMap::new()));
        let shutdown_requested = Arc::new(AtomicBool::new(false));

        let mut workers = Vec::with_capacity(config.worker_count);
        if config.enabled {
            for worker_id in 0..config.worker_count {
                let receiver: Receiver<CompileJob> = receiver.clone();
                let module = Arc::clone(&module);
                let in_progress = Arc::clone(&in_progress);
                let failed = Arc::clone(&failed);
                let published = Arc::clone(&published);
                let handle = std::thread::Builder::new()
                    .name(format!("langvm-jit-{worker_id}"))
                    .spawn(move || worker_loop(receiver, module, in_progress, failed, published))
                    .expect("failed to spawn JIT worker thread");
                workers.push(handle);
            }
        }

        Self {
            sender: Some(sender),
            workers,
            in_progress,
            failed,
            published,
            shutdown_requested,
        }
    }

    /// Submit `func_index` for background compilation unless it is already
    /// queued, in flight, published, or previously failed to compile — a
    /// function gets at most one compile attempt for the life of the `Vm`
    /// (spec.md §4.5 non-fatal, permanent interpreter fallback). Never
    /// blocks the caller.
    pub fn request_compile(&self, func_index: u32) {
        if self.shutdown_requested.load(Ordering::Relaxed) {
            return;
        }
        if self.published.read().unwrap().contains_key(&func_index) {
            return;
        }
        if self.failed.lock().unwrap().contains(&func_index) {
            return;
        }
        {
            let mut in_progress = self.in_progress.lock().unwrap();
            if !in_progress.insert(func_index) {
                return; // already in flight
            }
        }
        if let Some(sender) = &self.sender {
            if sender.try_send(CompileJob { func_index }).is_err() {
                tracing::warn!(func_index, "JIT queue full, dropping compile request");
                self.in_progress.lock().unwrap().remove(&func_index);
            }
        }
    }

    pub fn lookup(&self, func_index: u32) -> Option<Arc<dyn CompiledExecutor>> {
        self.published.read().unwrap().get(&func_index).cloned()
    }

    /// Stop accepting new jobs and join workers, waiting at most one second
    /// total (spec.md §5's bounded-shutdown requirement).
    pub fn shutdown(&mut self) {
        self.shutdown_requested.store(true, Ordering::Relaxed);
        self.sender.take(); // drop the sender: workers' recv() loops exit
        let deadline = std::time::Instant::now() + Duration::from_secs(1);
        for handle in self.workers.drain(..) {
            let remaining = deadline.saturating_duration_since(std::time::Instant::now());
            if remaining.is_zero() {
                break; // leave stragglers detached; process exit reclaims them
            }
            let _ = handle.join();
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(
    receiver: Receiver<CompileJob>,
    module: Arc<BytecodeModule>,
    in_progress: Arc<Mutex<HashSet<u32>>>,
    failed: Arc<Mutex<HashSet<u32>>>,
    published: Arc<RwLock<std::collections::HashMap<u32, Arc<dyn CompiledExecutor>>>>,
) {
    let compiler = CraneliftCompiler::new(module.clone());
    while let Ok(job) = receiver.recv() {
        let name = module
            .function(job.func_index)
            .map(|f| f.name.clone())
            .unwrap_or_default();
        let span = tracing::info_span!("jit-compile", function = %name);
        let _enter = span.enter();
        tracing::debug!("compiling");
        match compiler.compile(job.func_index) {
            Ok(executor) => {
                tracing::debug!("compiled, publishing");
                published.write().unwrap().insert(job.func_index, executor);
            }
            Err(e) => {
                tracing::warn!(error = %e, "compile failed, staying interpreted permanently");
                failed.lock().unwrap().insert(job.func_index);
            }
        }
        in_progress.lock().unwrap().remove(&job.func_index);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_threshold_matches_spec() {
        assert_eq!(JitConfig::default().threshold, 1000);
    }

    #[test]
    fn worker_count_is_capped_at_four() {
        assert!(JitConfig::default().worker_count <= 4);
        assert!(JitConfig::default().worker_count >= 1);
    }

    #[test]
    fn env_override_parses_threshold() {
        std::env::set_var("LANGVM_JIT_THRESHOLD", "42");
        assert_eq!(JitConfig::from_env().threshold, 42);
        std::env::remove_var("LANGVM_JIT_THRESHOLD");
    }

    #[test]
    fn invalid_env_override_is_ignored() {
        std::env::set_var("LANGVM_JIT_THRESHOLD", "not-a-number");
        assert_eq!(JitConfig::from_env().threshold, 1000);
        std::env::remove_var("LANGVM_JIT_THRESHOLD");
    }
}
