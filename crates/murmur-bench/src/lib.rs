//! Shared setup for the murmur benchmarks.

use murmur_core::{Admission, Hub, HubConfig, RoomId};
use murmur_protocol::{MessagePayload, ServerEvent};
use murmur_transport::{ConnectionHandle, OutboundReceiver};
use uuid::Uuid;

/// A room full of admitted connections, one user each.
///
/// Must be created and dropped inside a Tokio runtime context, because
/// releasing connections schedules presence timers.
pub struct Population {
    pub hub: Hub,
    pub room: RoomId,
    pub admissions: Vec<Admission>,
    pub receivers: Vec<OutboundReceiver>,
}

impl Population {
    /// Admit `size` connections into one room.
    pub fn new(size: usize, capacity: usize) -> Self {
        let (hub, _transitions) = Hub::new(HubConfig::default());
        let room = Uuid::new_v4();

        let (admissions, receivers) = (0..size)
            .map(|_| {
                let (handle, rx) = ConnectionHandle::channel(Uuid::new_v4(), capacity);
                let admission = hub.admit(handle);
                admission.join(room);
                (admission, rx)
            })
            .unzip();

        Self {
            hub,
            room,
            admissions,
            receivers,
        }
    }

    /// Empty every outbound queue, as the writer tasks would.
    pub fn drain(&mut self) -> usize {
        let mut frames = 0;
        for rx in &mut self.receivers {
            while rx.try_recv().is_ok() {
                frames += 1;
            }
        }
        frames
    }
}

/// A `new_message` event with a body of `len` bytes.
pub fn new_message(room: RoomId, len: usize) -> ServerEvent {
    ServerEvent::NewMessage {
        data: MessagePayload {
            id: Uuid::new_v4(),
            conversation_id: room,
            sender_id: Uuid::new_v4(),
            receiver_id: Uuid::new_v4(),
            content: "x".repeat(len),
            sent_at: chrono::Utc::now(),
        },
    }
}
