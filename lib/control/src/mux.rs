use heapless::Vec;

pub const MAX_CHIPS: usize = 8;

/// An output chip a joint can be routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChipId {
    None,
    Onboard,
    Driver(u8),
}

/// Number of drive slots on each chip of a board.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChipTable {
    chips: Vec<(ChipId, u8), MAX_CHIPS>,
}

impl ChipTable {
    pub fn new() -> ChipTable {
        ChipTable { chips: Vec::new() }
    }

    pub fn from_config(config: &config::Config) -> ChipTable {
        let mut table = ChipTable::new();
        if config.onboard_slots > 0 {
            table = table.with_chip(ChipId::Onboard, config.onboard_slots);
        }
        for i in 0..config.driver_chips {
            table = table.with_chip(ChipId::Driver(i), config.slots_per_driver);
        }
        table
    }

    /// Adds or replaces a chip. Chips past `MAX_CHIPS` are dropped.
    pub fn with_chip(mut self, chip: ChipId, slots: u8) -> ChipTable {
        if chip == ChipId::None {
            return self;
        }
        match self.chips.iter_mut().find(|(id, _)| *id == chip) {
            Some(entry) => entry.1 = slots,
            None => {
                if self.chips.push((chip, slots)).is_err() {
                    log::warn!("chip table full, dropping {:?}", chip);
                }
            }
        }
        self
    }

    /// Slots on `chip`, zero for chips that are not on this board.
    pub fn capacity(&self, chip: ChipId) -> u8 {
        self.chips
            .iter()
            .find(|(id, _)| *id == chip)
            .map(|(_, slots)| *slots)
            .unwrap_or(0)
    }

    /// Board-wide number of the first slot on `chip`, counting chips in table order.
    pub fn slot_offset(&self, chip: ChipId) -> Option<usize> {
        let mut offset = 0;
        for (id, slots) in self.chips.iter() {
            if *id == chip {
                return Some(offset);
            }
            offset += *slots as usize;
        }
        None
    }

    pub fn iter(&self) -> impl Iterator<Item = (ChipId, u8)> + '_ {
        self.chips.iter().copied()
    }
}

impl Default for ChipTable {
    fn default() -> Self {
        ChipTable::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Route {
    pub chip: ChipId,
    pub reverse_input: bool,
    pub reverse_output: bool,
}

/// Where a joint drives and senses this tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Binding {
    pub chip: ChipId,
    pub index: u8,
    /// board-wide slot number, selects both the sensor inputs and the bridge
    pub slot: usize,
    /// the motor is wired against its sensor, for control on the raw position
    pub invert: bool,
    /// the motor is wired backwards, for control on the logical position
    pub reverse_output: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bindings<const N: usize> {
    joints: [Option<Binding>; N],
    bound: Vec<(ChipId, u8), MAX_CHIPS>,
}

impl<const N: usize> Bindings<N> {
    pub fn joint(&self, joint: usize) -> Option<Binding> {
        self.joints.get(joint).copied().flatten()
    }

    /// Joints that got a slot on `chip`.
    pub fn bound(&self, chip: ChipId) -> u8 {
        self.bound
            .iter()
            .find(|(id, _)| *id == chip)
            .map(|(_, count)| *count)
            .unwrap_or(0)
    }

    /// Slots no joint claimed this tick. These must be driven off explicitly.
    pub fn unclaimed<'a>(&'a self, table: &'a ChipTable) -> impl Iterator<Item = (ChipId, u8)> + 'a {
        table
            .iter()
            .flat_map(move |(chip, slots)| (self.bound(chip)..slots).map(move |index| (chip, index)))
    }
}

impl<const N: usize> Default for Bindings<N> {
    fn default() -> Self {
        Bindings {
            joints: [None; N],
            bound: Vec::new(),
        }
    }
}

/// Assigns slots to joints in declaration order.
///
/// Each joint takes the next free slot on its chip. Joints that find their
/// chip full are left unbound, so a chip with too many joints routed to it
/// always starves the last ones.
pub fn bind<const N: usize>(routes: &[Route; N], table: &ChipTable) -> Bindings<N> {
    let mut bindings = Bindings::default();

    for (joint, route) in routes.iter().enumerate() {
        let next = bindings.bound(route.chip);
        if next >= table.capacity(route.chip) {
            continue;
        }
        let offset = match table.slot_offset(route.chip) {
            Some(offset) => offset,
            None => continue,
        };

        bindings.joints[joint] = Some(Binding {
            chip: route.chip,
            index: next,
            slot: offset + next as usize,
            invert: route.reverse_output != route.reverse_input,
            reverse_output: route.reverse_output,
        });

        match bindings.bound.iter_mut().find(|(id, _)| *id == route.chip) {
            Some(entry) => entry.1 += 1,
            // capacity is nonzero so the chip is in the table, which has the same bound
            None => {
                let _ = bindings.bound.push((route.chip, 1));
            }
        }
    }

    bindings
}

#[cfg(test)]
mod tests {
    use super::*;

    fn route(chip: ChipId) -> Route {
        Route {
            chip,
            reverse_input: false,
            reverse_output: false,
        }
    }

    #[test]
    fn test_capacity_from_config() {
        let table = ChipTable::from_config(&config::Config::hand());

        assert_eq!(table.capacity(ChipId::Onboard), 2);
        assert_eq!(table.capacity(ChipId::Driver(0)), 6);
        assert_eq!(table.capacity(ChipId::Driver(2)), 6);
        assert_eq!(table.capacity(ChipId::Driver(3)), 0);
        assert_eq!(table.capacity(ChipId::None), 0);

        let table = ChipTable::from_config(&config::Config::new());
        assert_eq!(table.capacity(ChipId::Onboard), 0);
        assert_eq!(table.iter().map(|(_, slots)| slots as usize).sum::<usize>(), 24);
    }

    #[test]
    fn test_bind_in_order() {
        let table = ChipTable::new().with_chip(ChipId::Driver(0), 4);
        let routes = [route(ChipId::Driver(0)); 3];

        let bindings = bind(&routes, &table);

        for joint in 0..3 {
            assert_eq!(bindings.joint(joint).map(|b| b.index), Some(joint as u8));
        }
        let unclaimed: std::vec::Vec<_> = bindings.unclaimed(&table).collect();
        assert_eq!(unclaimed, [(ChipId::Driver(0), 3)]);
    }

    #[test]
    fn test_overcommitted_chip_starves_last_joint() {
        let table = ChipTable::new()
            .with_chip(ChipId::Driver(0), 2)
            .with_chip(ChipId::Driver(1), 2);
        let routes = [
            route(ChipId::Driver(0)),
            route(ChipId::Driver(0)),
            route(ChipId::Driver(0)),
            route(ChipId::Driver(1)),
        ];

        let bindings = bind(&routes, &table);

        assert_eq!(bindings.joint(0).map(|b| b.index), Some(0));
        assert_eq!(bindings.joint(1).map(|b| b.index), Some(1));
        assert_eq!(bindings.joint(2), None);
        assert_eq!(bindings.joint(3).map(|b| (b.chip, b.index)), Some((ChipId::Driver(1), 0)));

        let unclaimed: std::vec::Vec<_> = bindings.unclaimed(&table).collect();
        assert_eq!(unclaimed, [(ChipId::Driver(1), 1)]);
    }

    #[test]
    fn test_unrouted_and_unknown_chips() {
        let table = ChipTable::new().with_chip(ChipId::Onboard, 2);
        let routes = [route(ChipId::None), route(ChipId::Driver(5)), route(ChipId::Onboard)];

        let bindings = bind(&routes, &table);

        assert_eq!(bindings.joint(0), None);
        assert_eq!(bindings.joint(1), None);
        assert_eq!(bindings.joint(2).map(|b| b.index), Some(0));
        assert_eq!(bindings.joint(7), None);
    }

    #[test]
    fn test_invert() {
        let table = ChipTable::new().with_chip(ChipId::Onboard, 4);
        let mut routes = [route(ChipId::Onboard); 4];
        routes[1].reverse_input = true;
        routes[2].reverse_output = true;
        routes[3].reverse_input = true;
        routes[3].reverse_output = true;

        let bindings = bind(&routes, &table);
        let inverts: std::vec::Vec<_> = (0..4).map(|j| bindings.joint(j).map(|b| b.invert)).collect();

        assert_eq!(inverts, [Some(false), Some(true), Some(true), Some(false)]);

        let reversed: std::vec::Vec<_> = (0..4).map(|j| bindings.joint(j).map(|b| b.reverse_output)).collect();
        assert_eq!(reversed, [Some(false), Some(false), Some(true), Some(true)]);
    }

    #[test]
    fn test_board_slots() {
        let table = ChipTable::from_config(&config::Config::hand());
        assert_eq!(table.slot_offset(ChipId::Onboard), Some(0));
        assert_eq!(table.slot_offset(ChipId::Driver(1)), Some(8));
        assert_eq!(table.slot_offset(ChipId::None), None);

        let routes = [
            route(ChipId::Driver(1)),
            route(ChipId::Onboard),
            route(ChipId::Driver(1)),
            route(ChipId::Onboard),
        ];
        let bindings = bind(&routes, &table);
        let slots: std::vec::Vec<_> = (0..4).map(|j| bindings.joint(j).map(|b| b.slot)).collect();

        assert_eq!(slots, [Some(8), Some(0), Some(9), Some(1)]);
    }
}
