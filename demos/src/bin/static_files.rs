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

//! A minimal static-file responder, wired through
//! [`ListenConfig::public_folder`]/[`ListenConfig::log_static`]. This is
//! not a general-purpose static-file server: no conditional GET, no
//! range requests, no directory listing — just enough to show the two
//! config fields doing something real. Anything outside the public
//! folder (`..` segments) or missing on disk gets a 404.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use riptide_parser::h1::response::Response;
use riptide_parser::status::Status as HttpStatus;
use riptide_parser::Version;
use riptide_server::config::ListenConfig;
use riptide_server::server::{RequestContext, Server};

fn resolve(root: &Path, request_path: &str) -> Option<PathBuf> {
    let relative = request_path.trim_start_matches('/');
    if relative.split('/').any(|seg| seg == "..") {
        return None;
    }
    let candidate = if relative.is_empty() { root.join("index.html") } else { root.join(relative) };
    candidate.starts_with(root).then_some(candidate)
}

fn serve(ctx: RequestContext, root: &Path, log_static: bool) {
    let path = ctx.request().path.clone();
    let response = match resolve(root, &path).and_then(|p| std::fs::read(&p).ok().map(|b| (p, b))) {
        Some((disk_path, body)) => {
            if log_static {
                log::info!(target: "static_files", "served {} ({} bytes)", disk_path.display(), body.len());
            }
            let mut response = Response::new(HttpStatus::Ok, Version::H1_1);
            response.header("Content-Type", content_type(&disk_path));
            response.body(body);
            response
        }
        None => {
            if log_static {
                log::info!(target: "static_files", "404 for {path}");
            }
            let mut response = Response::new(HttpStatus::NotFound, Version::H1_1);
            response.body(b"not found".to_vec());
            response
        }
    };
    let _ = ctx.respond(response);
}

fn content_type(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        Some("html") => "text/html; charset=utf-8",
        Some("css") => "text/css; charset=utf-8",
        Some("js") => "application/javascript; charset=utf-8",
        Some("json") => "application/json",
        _ => "application/octet-stream",
    }
}

fn main() {
    env_logger::init();

    let root: PathBuf = std::env::args().nth(1).map(PathBuf::from).unwrap_or_else(|| PathBuf::from("."));
    let log_static = true;

    let on_request = {
        let root = root.clone();
        Arc::new(move |ctx: RequestContext| serve(ctx, &root, log_static))
    };

    let mut config = ListenConfig::new(8082, on_request);
    config.public_folder = Some(root.clone());
    config.log_static = log_static;

    log::info!(target: "static_files", "serving {} on port {}", root.display(), config.port);
    if let Err(e) = Server::listen(config) {
        log::error!(target: "static_files", "server exited: {e}");
    }
}
