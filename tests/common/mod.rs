#![allow(dead_code)]

use room_display::transport::{
    ConnectOptions, Connection, Transport, TransportError, TransportEvent,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

#[derive(Default)]
pub struct Script {
    pub opened: Vec<ConnectOptions>,
    pub live: usize,
    pub subscriptions: Vec<String>,
    pub senders: Vec<mpsc::Sender<TransportEvent>>,
    pub fail_open: bool,
    pub fail_subscribe: bool,
}

/// In-memory transport; tests push events through the recorded senders.
#[derive(Clone, Default)]
pub struct ScriptedTransport {
    pub script: Arc<Mutex<Script>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn live(&self) -> usize {
        self.script.lock().unwrap().live
    }

    pub fn opened(&self) -> Vec<ConnectOptions> {
        self.script.lock().unwrap().opened.clone()
    }

    pub fn subscriptions(&self) -> Vec<String> {
        self.script.lock().unwrap().subscriptions.clone()
    }

    pub fn latest_sender(&self) -> mpsc::Sender<TransportEvent> {
        self.script.lock().unwrap().senders.last().cloned().unwrap()
    }

    pub fn sender(&self, index: usize) -> mpsc::Sender<TransportEvent> {
        self.script.lock().unwrap().senders[index].clone()
    }

    pub fn set_fail_open(&self, fail: bool) {
        self.script.lock().unwrap().fail_open = fail;
    }

    pub fn set_fail_subscribe(&self, fail: bool) {
        self.script.lock().unwrap().fail_subscribe = fail;
    }
}

pub struct ScriptedConnection {
    script: Arc<Mutex<Script>>,
    closed: bool,
}

impl Connection for ScriptedConnection {
    fn subscribe(&mut self, topic: &str) -> Result<(), TransportError> {
        let mut script = self.script.lock().unwrap();
        if script.fail_subscribe {
            return Err(TransportError::Request("subscribe queue closed".to_string()));
        }
        script.subscriptions.push(topic.to_string());
        Ok(())
    }

    fn force_close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.script.lock().unwrap().live -= 1;
        }
    }
}

impl Drop for ScriptedConnection {
    fn drop(&mut self) {
        self.force_close();
    }
}

impl Transport for ScriptedTransport {
    type Connection = ScriptedConnection;

    fn open(
        &self,
        options: &ConnectOptions,
    ) -> Result<(ScriptedConnection, mpsc::Receiver<TransportEvent>), TransportError> {
        let mut script = self.script.lock().unwrap();
        if script.fail_open {
            return Err(TransportError::Unavailable("no mqtt".to_string()));
        }
        let (tx, rx) = mpsc::channel(16);
        script.opened.push(options.clone());
        script.senders.push(tx);
        script.live += 1;
        Ok((
            ScriptedConnection {
                script: self.script.clone(),
                closed: false,
            },
            rx,
        ))
    }
}

/// Polls `condition` until it holds or a second has passed.
pub async fn wait_until<F: Fn() -> bool>(condition: F) -> bool {
    for _ in 0..100 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
