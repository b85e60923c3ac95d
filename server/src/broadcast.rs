// Copyright 2022 Ryan Seipp
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! The broadcast fan-out primitive (§4.I): `websocket_each` schedules a
//! task against every other live WebSocket connection and fires a
//! completion callback exactly once, after every target has been
//! visited.
//!
//! The original's `websocket_each(origin, task, arg, on_complete)` takes
//! an opaque `arg` pointer freed by `on_complete`; here `arg` is simply
//! whatever `task`/`on_complete` capture by move; a closure's captured
//! state is dropped exactly once, same as the C-side `free(arg)`, so no
//! explicit argument parameter is needed in the Rust signature.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::conn::ConnHandle;
use crate::server::ServerShared;
use crate::websocket::WebSocket;

/// Enumerates every live WebSocket connection other than `origin` and
/// schedules `task(ws)` for each on the worker pool. A target whose
/// connection lock is momentarily contended is retried rather than
/// skipped; only a target whose slot is gone (closed, generation-stale)
/// counts as visited without running `task`. Once every target has
/// been visited, `on_complete(origin)` is scheduled exactly once, on
/// some worker thread - never the caller's, matching §4.I.
///
/// Crate-private: external callers reach this through
/// [`crate::websocket::WebSocket::broadcast`], which doesn't require
/// naming the crate-internal `ServerShared` type.
pub(crate) fn websocket_each<Task, Complete>(
    shared: &Arc<ServerShared>,
    origin: ConnHandle,
    task: Task,
    on_complete: Option<Complete>,
) where
    Task: Fn(&WebSocket) + Send + Sync + 'static,
    Complete: FnOnce(ConnHandle) + Send + 'static,
{
    let targets = shared.conns.handles_except(origin);
    log::debug!(target: "riptide_server::broadcast", "fan-out to {} targets", targets.len());

    let task = Arc::new(task);
    let on_complete = Arc::new(Mutex::new(on_complete));
    let remaining = Arc::new(AtomicUsize::new(targets.len()));

    if targets.is_empty() {
        complete(shared, origin, &on_complete);
        return;
    }

    for handle in targets {
        schedule_target(Arc::clone(shared), origin, handle, Arc::clone(&task), Arc::clone(&remaining), Arc::clone(&on_complete));
    }
}

/// Visits a single target, re-deferring itself if the target's
/// connection lock is momentarily held by another worker rather than
/// treating contention as a skip. Only a target whose slot no longer
/// resolves at all (closed and generation-stale, per §4.I's tie-break)
/// is skipped without a retry.
fn schedule_target<Task, Complete>(
    shared: Arc<ServerShared>,
    origin: ConnHandle,
    handle: ConnHandle,
    task: Arc<Task>,
    remaining: Arc<AtomicUsize>,
    on_complete: Arc<Mutex<Option<Complete>>>,
) where
    Task: Fn(&WebSocket) + Send + Sync + 'static,
    Complete: FnOnce(ConnHandle) + Send + 'static,
{
    shared.defer(move || {
        let Some(conn) = shared.conns.get(handle) else {
            if remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
                complete(&shared, origin, &on_complete);
            }
            return;
        };
        match conn.try_lock() {
            Ok(guard) => {
                let is_ws = matches!(guard.protocol, crate::conn::ProtocolState::WebSocket(_));
                drop(guard);
                if is_ws {
                    let ws = WebSocket::new(handle, Arc::clone(&shared));
                    task(&ws);
                }
                if remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
                    complete(&shared, origin, &on_complete);
                }
            }
            // Still live, just contended - retry instead of skipping so
            // a momentarily-locked peer still receives the broadcast.
            Err(_) => schedule_target(shared, origin, handle, task, remaining, on_complete),
        }
    });
}

fn complete<C>(shared: &Arc<ServerShared>, origin: ConnHandle, on_complete: &Arc<Mutex<Option<C>>>)
where
    C: FnOnce(ConnHandle) + Send + 'static,
{
    let cb = on_complete.lock().unwrap_or_else(|e| e.into_inner()).take();
    if let Some(cb) = cb {
        shared.defer(move || cb(origin));
    }
}

