use config::{CHANNELS, GAUGES};
use control::LoopCommand;

use crate::HostToDevice;

/// Transport level identity of a host, e.g. its address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientId(pub u32);

fn lapsed(since_ms: u32, now_ms: u32, window_ms: u32) -> bool {
    now_ms.wrapping_sub(since_ms) > window_ms
}

/// Only one host may drive the joints at a time. It keeps authority for as
/// long as it sends something at least once per hold window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandAuthority {
    holder: Option<ClientId>,
    last_message_ms: u32,
    hold_window_ms: u32,
}

impl CommandAuthority {
    pub const fn new(hold_window_ms: u32) -> CommandAuthority {
        CommandAuthority {
            holder: None,
            last_message_ms: 0,
            hold_window_ms,
        }
    }

    pub fn holder(&self) -> Option<ClientId> {
        self.holder
    }

    /// True if `client` may command now, which also renews its hold.
    pub fn claim(&mut self, client: ClientId, now_ms: u32) -> bool {
        match self.holder {
            Some(holder) if holder != client && !lapsed(self.last_message_ms, now_ms, self.hold_window_ms) => false,
            holder => {
                if holder != Some(client) {
                    log::info!("{:?} took command", client);
                }
                self.holder = Some(client);
                self.last_message_ms = now_ms;
                true
            }
        }
    }

    /// Releases a holder that went quiet. Returns true when that happened.
    pub fn expire(&mut self, now_ms: u32) -> bool {
        match self.holder {
            Some(holder) if lapsed(self.last_message_ms, now_ms, self.hold_window_ms) => {
                log::info!("{:?} lost command", holder);
                self.holder = None;
                true
            }
            _ => false,
        }
    }
}

/// State is streamed until the host stops asking for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateSubscription {
    last_request_ms: Option<u32>,
    window_ms: u32,
}

impl StateSubscription {
    pub const fn new(window_ms: u32) -> StateSubscription {
        StateSubscription {
            last_request_ms: None,
            window_ms,
        }
    }

    pub fn request(&mut self, now_ms: u32) {
        self.last_request_ms = Some(now_ms);
    }

    pub fn active(&self, now_ms: u32) -> bool {
        match self.last_request_ms {
            Some(last) => !lapsed(last, now_ms, self.window_ms),
            None => false,
        }
    }
}

/// What the transport should do with a host message.
#[derive(Debug, Clone, PartialEq)]
pub enum Routed {
    Loop(LoopCommand<CHANNELS, GAUGES>),
    SendConfiguration,
    Subscribed,
    /// another host holds command authority
    Rejected(Option<ClientId>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandRouter {
    authority: CommandAuthority,
    subscription: StateSubscription,
}

impl CommandRouter {
    pub const fn new(hold_window_ms: u32) -> CommandRouter {
        CommandRouter {
            authority: CommandAuthority::new(hold_window_ms),
            subscription: StateSubscription::new(hold_window_ms),
        }
    }

    pub fn authority(&self) -> &CommandAuthority {
        &self.authority
    }

    pub fn route(&mut self, message: HostToDevice, client: ClientId, now_ms: u32) -> Routed {
        match message {
            HostToDevice::Command(frame) => self.guarded(client, now_ms, || frame.to_loop_command()),
            HostToDevice::Enable(mask) => self.guarded(client, now_ms, || LoopCommand::SetEnabled(mask)),
            HostToDevice::Configure(frame) => Routed::Loop(frame.to_loop_command()),
            HostToDevice::ReloadConfiguration => Routed::Loop(LoopCommand::Reload),
            HostToDevice::RequestConfiguration => Routed::SendConfiguration,
            HostToDevice::RequestStateUpdates => {
                self.subscription.request(now_ms);
                Routed::Subscribed
            }
        }
    }

    fn guarded(
        &mut self,
        client: ClientId,
        now_ms: u32,
        command: impl FnOnce() -> LoopCommand<CHANNELS, GAUGES>,
    ) -> Routed {
        if self.authority.claim(client, now_ms) {
            Routed::Loop(command())
        } else {
            Routed::Rejected(self.authority.holder())
        }
    }

    /// Call once per tick. A holder that went quiet leaves the joints halted.
    pub fn poll(&mut self, now_ms: u32) -> Option<LoopCommand<CHANNELS, GAUGES>> {
        if self.authority.expire(now_ms) {
            Some(LoopCommand::Halt)
        } else {
            None
        }
    }

    pub fn streaming(&self, now_ms: u32) -> bool {
        self.subscription.active(now_ms)
    }
}
