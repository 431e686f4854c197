/*
 *  netcheck.rs
 *
 *  wxfresh - weather that keeps up
 *  (c) 2020-26 Stuart Hunter
 *
 *	This program is free software: you can redistribute it and/or modify
 *	it under the terms of the GNU General Public License as published by
 *	the Free Software Foundation, either version 3 of the License, or
 *	(at your option) any later version.
 *
 *	This program is distributed in the hope that it will be useful,
 *	but WITHOUT ANY WARRANTY; without even the implied warranty of
 *	MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 *	GNU General Public License for more details.
 *
 *	See <http://www.gnu.org/licenses/> to get a copy of the GNU General
 *	Public License.
 *
 */
use log::debug;
use std::future::Future;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;

pub trait Connectivity {
    fn is_online(&self) -> impl Future<Output = bool> + Send;
}

/// Online means a TCP connect to a well known host succeeds in time.
#[derive(Debug, Clone)]
pub struct TcpConnectivity {
    host: String,
    port: u16,
    timeout: Duration,
}

impl TcpConnectivity {
    pub fn new(host: &str, port: u16, timeout: Duration) -> Self {
        Self { host: host.to_string(), port, timeout }
    }
}

impl Connectivity for TcpConnectivity {
    async fn is_online(&self) -> bool {
        let addr = format!("{}:{}", self.host, self.port);
        match timeout(self.timeout, TcpStream::connect(&addr)).await {
            Ok(Ok(_)) => true,
            Ok(Err(e)) => {
                debug!("connectivity check to {} failed: {}", addr, e);
                false
            }
            Err(_) => {
                debug!("connectivity check to {} timed out", addr);
                false
            }
        }
    }
}
