use heapless::spsc::{Consumer, Producer, Queue};

use crate::channel::{ChannelConfig, GaugeConfig};

/// Requests from the communication side, applied by the loop between ticks.
#[derive(Debug, Clone, PartialEq)]
pub enum LoopCommand<const N: usize, const G: usize> {
    Drive {
        power_offset: [f32; N],
        seek: [Option<f32>; N],
    },
    Configure {
        channels: [ChannelConfig; N],
        gauges: [GaugeConfig; G],
        persist: bool,
    },
    /// bit i enables channel i
    SetEnabled(u32),
    SetCurrentFraction(f32),
    Halt,
    Reload,
}

pub type CommandQueue<const N: usize, const G: usize, const Q: usize> = Queue<LoopCommand<N, G>, Q>;
pub type CommandProducer<'a, const N: usize, const G: usize, const Q: usize> = Producer<'a, LoopCommand<N, G>, Q>;
pub type CommandConsumer<'a, const N: usize, const G: usize, const Q: usize> = Consumer<'a, LoopCommand<N, G>, Q>;
