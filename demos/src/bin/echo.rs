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

//! Smallest possible WebSocket echo server: every upgrade request is
//! accepted, and every message received is written straight back to its
//! own connection. Plain HTTP requests get a 200 with a short body.

use std::sync::Arc;

use riptide_parser::h1::response::Response;
use riptide_parser::status::Status as HttpStatus;
use riptide_parser::Version;
use riptide_server::config::{ListenConfig, UpgradeConfig};
use riptide_server::server::Server;

fn main() {
    env_logger::init();

    let on_request = Arc::new(|ctx: riptide_server::server::RequestContext| {
        if ctx.is_upgrade_requested() {
            let on_message = Arc::new(|ws: &riptide_server::websocket::WebSocket, data: &[u8], is_text: bool| {
                ws.write(data, is_text);
            });
            let config = UpgradeConfig::new(on_message);
            if let Err(e) = ctx.websocket_upgrade(config) {
                log::warn!(target: "echo", "upgrade failed: {e}");
            }
            return;
        }

        let mut response = Response::new(HttpStatus::Ok, Version::H1_1);
        response.header("Content-Type", "text/plain");
        response.body(b"riptide echo server: connect with a WebSocket client");
        let _ = ctx.respond(response);
    });

    let config = ListenConfig::new(8080, on_request);
    log::info!(target: "echo", "listening on port {}", config.port);
    if let Err(e) = Server::listen(config) {
        log::error!(target: "echo", "server exited: {e}");
    }
}
