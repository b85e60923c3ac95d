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

//! A tiny chat room: every connecting client is assigned a random
//! four-digit name, and every message one client sends is relayed,
//! prefixed with that name, to every other connected client.

use std::sync::Arc;

use rand::Rng;
use riptide_parser::h1::response::Response;
use riptide_parser::status::Status as HttpStatus;
use riptide_parser::Version;
use riptide_server::config::{ListenConfig, UpgradeConfig};
use riptide_server::server::Server;
use riptide_server::websocket::WebSocket;

fn random_name() -> String {
    let n: u16 = rand::thread_rng().gen_range(0..10000);
    format!("guest-{n:04}")
}

fn main() {
    env_logger::init();

    let on_request = Arc::new(|ctx: riptide_server::server::RequestContext| {
        if ctx.is_upgrade_requested() {
            let name = random_name();

            let on_open = Arc::new(move |ws: &WebSocket| {
                let greeting = format!("{name} joined");
                log::info!(target: "broadcast", "{greeting}");
                let payload = greeting.into_bytes();
                ws.broadcast(
                    move |peer: &WebSocket| peer.write(&payload, true),
                    None::<fn(riptide_server::conn::ConnHandle)>,
                );
            });

            let on_message = Arc::new(|ws: &WebSocket, data: &[u8], is_text: bool| {
                if !is_text {
                    return;
                }
                let Ok(text) = std::str::from_utf8(data) else { return };
                let line = text.to_owned();
                ws.broadcast(
                    move |peer: &WebSocket| peer.write(line.as_bytes(), true),
                    None::<fn(riptide_server::conn::ConnHandle)>,
                );
            });

            let mut config = UpgradeConfig::new(on_message);
            config.on_open = Some(on_open);
            if let Err(e) = ctx.websocket_upgrade(config) {
                log::warn!(target: "broadcast", "upgrade failed: {e}");
            }
            return;
        }

        let mut response = Response::new(HttpStatus::Ok, Version::H1_1);
        response.header("Content-Type", "text/plain");
        response.body(b"riptide broadcast demo: connect with a WebSocket client");
        let _ = ctx.respond(response);
    });

    let config = ListenConfig::new(8081, on_request);
    log::info!(target: "broadcast", "listening on port {}", config.port);
    if let Err(e) = Server::listen(config) {
        log::error!(target: "broadcast", "server exited: {e}");
    }
}
