//! Real-time setup for the control process (Linux SCHED_FIFO, CPU affinity,
//! mlockall; memory locking only elsewhere).
//!
//! Everything here is best effort: a request the OS refuses is logged and the
//! experiment runs without it. Settings apply to the whole process before the
//! control thread is spawned, so the thread inherits them.

use std::sync::OnceLock;

use crate::cli::{RtArgs, RtLock};

static RT_ONCE: OnceLock<()> = OnceLock::new();

/// Apply the requested real-time settings once per process.
pub fn setup_rt_once(args: &RtArgs) {
    if !args.rt {
        return;
    }
    RT_ONCE.get_or_init(|| {
        let lock = args.rt_lock.unwrap_or_else(RtLock::os_default);
        match lock_memory(lock) {
            Ok(()) => tracing::info!(?lock, "memory locked"),
            Err(e) => tracing::warn!(error = %e, "memory locking unavailable"),
        }
        platform::apply(args.rt_prio, args.rt_cpu);
    });
}

#[cfg(unix)]
fn lock_memory(lock: RtLock) -> eyre::Result<()> {
    let flags = match lock {
        RtLock::None => return Ok(()),
        RtLock::Current => libc::MCL_CURRENT,
        RtLock::All => libc::MCL_CURRENT | libc::MCL_FUTURE,
    };
    // SAFETY: mlockall takes plain flags and touches no Rust-managed memory.
    let rc = unsafe { libc::mlockall(flags) };
    if rc == 0 {
        return Ok(());
    }
    let err = std::io::Error::last_os_error();
    let retryable = matches!(err.raw_os_error(), Some(c) if c == libc::EPERM || c == libc::ENOMEM);
    if lock == RtLock::All && retryable {
        // SAFETY: as above.
        if unsafe { libc::mlockall(libc::MCL_CURRENT) } == 0 {
            tracing::warn!(error = %err, "mlockall(current|future) refused; locked current pages only");
            return Ok(());
        }
    }
    let mut msg = format!("mlockall failed: {err}");
    if retryable {
        if let Some(limit) = memlock_limit_kib() {
            msg.push_str(&format!("; memlock limit {limit} KiB"));
        }
        msg.push_str("; needs CAP_IPC_LOCK (or root) and a sufficient 'ulimit -l'");
    }
    Err(eyre::eyre!(msg))
}

#[cfg(not(unix))]
fn lock_memory(lock: RtLock) -> eyre::Result<()> {
    if lock == RtLock::None {
        return Ok(());
    }
    Err(eyre::eyre!("memory locking is not supported on this OS"))
}

#[cfg(unix)]
fn memlock_limit_kib() -> Option<libc::rlim_t> {
    let mut rlim = std::mem::MaybeUninit::<libc::rlimit>::uninit();
    // SAFETY: getrlimit writes a full rlimit into the provided pointer on success.
    let rc = unsafe { libc::getrlimit(libc::RLIMIT_MEMLOCK, rlim.as_mut_ptr()) };
    if rc != 0 {
        return None;
    }
    // SAFETY: rc == 0 means the struct was initialized.
    let cur = unsafe { rlim.assume_init() }.rlim_cur;
    (cur != libc::RLIM_INFINITY).then_some(cur / 1024)
}

#[cfg(target_os = "linux")]
mod platform {
    /// Bits in a `cpu_set_t`.
    const MAX_CPUSET_BITS: usize = std::mem::size_of::<libc::cpu_set_t>() * 8;

    pub fn apply(prio: Option<i32>, cpu: Option<usize>) {
        match fifo_priority(prio) {
            Ok(p) => tracing::info!(priority = p, "SCHED_FIFO enabled"),
            Err(e) => tracing::warn!(error = %e, "SCHED_FIFO unavailable"),
        }
        match pin_to_cpu(cpu.unwrap_or(0)) {
            Ok(c) => tracing::info!(cpu = c, "process pinned"),
            Err(e) => tracing::warn!(error = %e, "CPU affinity unavailable"),
        }
    }

    fn fifo_priority(prio: Option<i32>) -> eyre::Result<i32> {
        // SAFETY: pure queries of the scheduler's static priority range.
        let (min, max) = unsafe {
            (
                libc::sched_get_priority_min(libc::SCHED_FIFO),
                libc::sched_get_priority_max(libc::SCHED_FIFO),
            )
        };
        if min < 0 || max < 0 {
            return Err(eyre::eyre!(
                "could not query SCHED_FIFO priority range: {}",
                std::io::Error::last_os_error()
            ));
        }
        let want = prio.unwrap_or(max);
        let p = want.clamp(min, max);
        if p != want {
            tracing::warn!(requested = want, applied = p, min, max, "rt priority clamped");
        }
        let param = libc::sched_param { sched_priority: p };
        // SAFETY: pid 0 is the calling process; param outlives the call.
        let rc = unsafe { libc::sched_setscheduler(0, libc::SCHED_FIFO, &param) };
        if rc != 0 {
            return Err(eyre::eyre!(
                "sched_setscheduler failed: {}; needs CAP_SYS_NICE or root",
                std::io::Error::last_os_error()
            ));
        }
        Ok(p)
    }

    fn pin_to_cpu(cpu: usize) -> eyre::Result<usize> {
        // SAFETY: sysconf has no memory-safety preconditions.
        let online = unsafe { libc::sysconf(libc::_SC_NPROCESSORS_ONLN) };
        let online = usize::try_from(online).unwrap_or(1).max(1);
        let limit = online.min(MAX_CPUSET_BITS);
        if cpu >= limit {
            return Err(eyre::eyre!("cpu {cpu} out of range (0..{limit})"));
        }
        // SAFETY: cpu_set_t is plain data; CPU_ZERO/CPU_SET stay within its bits
        // because cpu < MAX_CPUSET_BITS.
        let rc = unsafe {
            let mut set: libc::cpu_set_t = std::mem::zeroed();
            libc::CPU_ZERO(&mut set);
            libc::CPU_SET(cpu, &mut set);
            libc::sched_setaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &set)
        };
        if rc != 0 {
            return Err(eyre::eyre!(
                "sched_setaffinity failed: {}",
                std::io::Error::last_os_error()
            ));
        }
        Ok(cpu)
    }
}

#[cfg(not(target_os = "linux"))]
mod platform {
    pub fn apply(prio: Option<i32>, cpu: Option<usize>) {
        if prio.is_some() || cpu.is_some() {
            tracing::warn!("--rt-prio and --rt-cpu are only supported on Linux");
        }
    }
}
