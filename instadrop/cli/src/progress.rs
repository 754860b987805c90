//! Terminal progress for running sessions.

use std::{
    collections::HashMap,
    sync::{Mutex, RwLock},
    time::Duration,
};

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use instadropx_common::{FileProjection, SessionState};
use instadropx_receiver::{
    ReceiveFilesConnectingEvent, ReceiveFilesReceivingEvent,
    ReceiveFilesSubscriber,
};
use instadropx_sender::{
    SendFilesConnectingEvent, SendFilesSendingEvent, SendFilesSubscriber,
};
use uuid::Uuid;

fn bar_style() -> ProgressStyle {
    ProgressStyle::with_template(
        "{spinner:.green} {msg} [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta})",
    )
    .unwrap_or_else(|_| ProgressStyle::default_bar())
    .progress_chars("#>-")
}

fn new_bar(mp: &MultiProgress, total: u64, message: String) -> ProgressBar {
    let pb = mp.add(ProgressBar::new(total));
    pb.set_style(bar_style());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb.set_message(message);
    pb
}

/// One bar per file, keyed by its position in the session.
pub struct SendProgress {
    id: String,
    mp: MultiProgress,
    bars: RwLock<HashMap<u32, ProgressBar>>,
}

impl SendProgress {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            mp: MultiProgress::new(),
            bars: RwLock::new(HashMap::new()),
        }
    }
}

impl SendFilesSubscriber for SendProgress {
    fn get_id(&self) -> String {
        self.id.clone()
    }

    fn notify_connecting(&self, event: SendFilesConnectingEvent) {
        let _ = self
            .mp
            .println(format!("Receiver joined room {}", event.room_id));
    }

    fn notify_sending(&self, event: SendFilesSendingEvent) {
        let Ok(mut bars) = self.bars.write() else {
            return;
        };
        let total = event.sent + event.remaining;
        let pb = bars.entry(event.index).or_insert_with(|| {
            new_bar(&self.mp, total, format!("Sending {}", event.name))
        });

        pb.set_position(event.sent);
        if event.remaining == 0 {
            pb.finish_with_message(format!("[DONE] Sent {}", event.name));
        }
    }

    fn notify_state(&self, state: SessionState) {
        if let SessionState::Error { reason } = state {
            if let Ok(bars) = self.bars.read() {
                bars.values()
                    .filter(|pb| !pb.is_finished())
                    .for_each(ProgressBar::abandon);
            }
            let _ = self.mp.println(format!("[ERROR] {reason}"));
        }
    }
}

/// Bar for the file currently being received.
pub struct ReceiveProgress {
    id: String,
    mp: MultiProgress,
    current: Mutex<Option<ProgressBar>>,
}

impl ReceiveProgress {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            mp: MultiProgress::new(),
            current: Mutex::new(None),
        }
    }
}

impl ReceiveFilesSubscriber for ReceiveProgress {
    fn get_id(&self) -> String {
        self.id.clone()
    }

    fn notify_connecting(&self, event: ReceiveFilesConnectingEvent) {
        let _ = self.mp.println(format!(
            "Sender connected to room {}, waiting for files",
            event.room_id
        ));
    }

    fn notify_receiving(&self, event: ReceiveFilesReceivingEvent) {
        let Ok(mut current) = self.current.lock() else {
            return;
        };
        let pb = current.get_or_insert_with(|| {
            new_bar(&self.mp, event.size, format!("Receiving {}", event.name))
        });
        pb.set_position(event.received);
    }

    fn notify_file(&self, file: FileProjection) {
        let message = format!("[DONE] Received {}", file.name());
        match self.current.lock().ok().and_then(|mut c| c.take()) {
            Some(pb) => pb.finish_with_message(message),
            None => {
                let _ = self.mp.println(message);
            }
        }
    }

    fn notify_state(&self, state: SessionState) {
        if let SessionState::Error { reason } = state {
            if let Some(pb) = self.current.lock().ok().and_then(|mut c| c.take())
            {
                pb.abandon();
            }
            let _ = self.mp.println(format!("[ERROR] {reason}"));
        }
    }
}
