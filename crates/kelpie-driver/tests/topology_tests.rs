//! Discovery validation against a synthetic config-space bus.
//!
//! Every seam is injected, so these run without hardware: the fake config
//! space emulates the all-ones absence signal and the BAR size decoder, and
//! the fake mapper hands out in-memory register windows.

use kelpie_driver::chip::{device_id, KELPIE_VENDOR_ID};
use kelpie_driver::{
    is_parent_found, probe_bars, qualify, ConfigSpace, DeviceRegistry, FabricError, MapPhysical,
    PciAddress, RegisterWindow, Result,
};
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};

const VENDOR_DEVICE: u16 = 0x00;
const HEADER: u16 = 0x0C;
const BAR0: u16 = 0x10;
const BUS_NUMBERS: u16 = 0x18;

/// In-memory config space with BAR-decoder emulation.
#[derive(Default)]
struct FakeConfigSpace {
    present: HashSet<PciAddress>,
    regs: RefCell<HashMap<(PciAddress, u16), u32>>,
    /// Size masks answered when the all-ones probe lands on a BAR slot.
    bar_masks: HashMap<(PciAddress, u16), u32>,
    writes: RefCell<Vec<(PciAddress, u16, u32)>>,
}

impl FakeConfigSpace {
    fn set(&mut self, addr: PciAddress, offset: u16, value: u32) {
        self.present.insert(addr);
        self.regs.get_mut().insert((addr, offset), value);
    }

    /// A qualified switch function: bridge header, one 1 MB memory BAR0.
    fn add_switch(&mut self, addr: PciAddress, dev_id: u16, secondary_bus: u8) {
        self.set(
            addr,
            VENDOR_DEVICE,
            (u32::from(dev_id) << 16) | u32::from(KELPIE_VENDOR_ID),
        );
        self.set(addr, 0x08, 0x0604_0002); // bridge class, revision 2
        self.set(addr, HEADER, 0x0001 << 16);
        self.set(addr, BAR0, 0x9000_0000);
        self.bar_masks.insert((addr, BAR0), 0xFFF0_0000); // 1 MB
        self.set(addr, BUS_NUMBERS, u32::from(secondary_bus) << 8);
    }

    fn reg(&self, addr: PciAddress, offset: u16) -> u32 {
        *self.regs.borrow().get(&(addr, offset)).unwrap_or(&0)
    }
}

impl ConfigSpace for FakeConfigSpace {
    fn read_dword(&self, address: PciAddress, offset: u16) -> Result<u32> {
        if !self.present.contains(&address) {
            return Ok(0xFFFF_FFFF);
        }
        Ok(self.reg(address, offset))
    }

    fn write_dword(&self, address: PciAddress, offset: u16, value: u32) -> Result<()> {
        self.writes.borrow_mut().push((address, offset, value));
        // The BAR decoder answers an all-ones probe with its size mask.
        let stored = if value == 0xFFFF_FFFF {
            match self.bar_masks.get(&(address, offset)) {
                Some(mask) => *mask,
                None => value,
            }
        } else {
            value
        };
        self.regs.borrow_mut().insert((address, offset), stored);
        Ok(())
    }
}

/// Zero-filled register window standing in for a mapped BAR.
struct FakeWindow {
    words: Vec<u32>,
}

impl RegisterWindow for FakeWindow {
    fn len(&self) -> usize {
        self.words.len() * 4
    }

    fn read32(&self, offset: usize) -> Result<u32> {
        self.words
            .get(offset / 4)
            .copied()
            .ok_or_else(|| FabricError::failed("fake window read out of bounds"))
    }

    fn write32(&mut self, offset: usize, value: u32) -> Result<()> {
        match self.words.get_mut(offset / 4) {
            Some(w) => {
                *w = value;
                Ok(())
            }
            None => Err(FabricError::failed("fake window write out of bounds")),
        }
    }
}

struct FakeMapper {
    fail: bool,
}

impl FakeMapper {
    fn new() -> Self {
        Self { fail: false }
    }

    fn failing() -> Self {
        Self { fail: true }
    }
}

impl MapPhysical for FakeMapper {
    fn map(&self, _base: u64, size: u64) -> Result<Box<dyn RegisterWindow>> {
        if self.fail {
            return Err(FabricError::NoMemory { size });
        }
        let len = usize::try_from(size).unwrap();
        Ok(Box::new(FakeWindow {
            words: vec![0; len / 4],
        }))
    }
}

fn addr(bus: u8, device: u8) -> PciAddress {
    PciAddress::new(0, bus, device, 0)
}

#[test]
fn absent_function_reads_all_ones_and_scan_finds_nothing() {
    let config = FakeConfigSpace::default();
    let registry = DeviceRegistry::scan(&config, &FakeMapper::new()).unwrap();
    assert_eq!(registry.device_count(), 0);
}

#[test]
fn chained_reappearance_is_admitted_once() {
    let mut config = FakeConfigSpace::default();
    // Root at bus 0 with secondary 1; the same silicon seen again at bus 1
    // with secondary 2.
    config.add_switch(addr(0, 0), device_id::KLP3636, 1);
    config.add_switch(addr(1, 0), device_id::KLP3636, 2);

    let registry = DeviceRegistry::scan(&config, &FakeMapper::new()).unwrap();
    assert_eq!(registry.device_count(), 1);
    assert_eq!(registry.device(0).unwrap().address(), addr(0, 0));
}

#[test]
fn independent_roots_admit_in_bus_order() {
    let mut config = FakeConfigSpace::default();
    // Switch A: root at bus 0, reappears at bus 1.
    config.add_switch(addr(0, 0), device_id::KLP3636, 1);
    config.add_switch(addr(1, 0), device_id::KLP3636, 2);
    // Switch B: root at bus 3, reappears at bus 4.
    config.add_switch(addr(3, 0), device_id::KLP3668, 4);
    config.add_switch(addr(4, 0), device_id::KLP3668, 5);
    // Noise: foreign vendor, and a Kelpie part that is not a switch.
    config.set(addr(0, 5), VENDOR_DEVICE, 0x1234_8086);
    config.set(addr(0, 6), VENDOR_DEVICE, 0x9999_0000 | u32::from(KELPIE_VENDOR_ID));

    let registry = DeviceRegistry::scan(&config, &FakeMapper::new()).unwrap();
    assert_eq!(registry.device_count(), 2);
    assert_eq!(registry.device(0).unwrap().address(), addr(0, 0));
    assert_eq!(registry.device(0).unwrap().device_id(), device_id::KLP3636);
    assert_eq!(registry.device(1).unwrap().address(), addr(3, 0));
    assert_eq!(registry.device(1).unwrap().device_id(), device_id::KLP3668);
}

#[test]
fn a_device_is_never_its_own_parent() {
    let mut config = FakeConfigSpace::default();
    config.add_switch(addr(0, 0), device_id::KLP3636, 1);
    assert!(!is_parent_found(&config, addr(0, 0), addr(0, 0)));
}

#[test]
fn ancestor_walk_follows_secondary_chain() {
    let mut config = FakeConfigSpace::default();
    config.add_switch(addr(0, 0), device_id::KLP3636, 1);
    config.add_switch(addr(1, 0), device_id::KLP3636, 2);
    config.add_switch(addr(2, 0), device_id::KLP3636, 3);

    // Direct child and grandchild are both reachable descendants.
    assert!(is_parent_found(&config, addr(0, 0), addr(1, 5)));
    assert!(is_parent_found(&config, addr(0, 0), addr(2, 0)));
    assert!(is_parent_found(&config, addr(0, 0), addr(3, 0)));
    // A bus outside the chain is not.
    assert!(!is_parent_found(&config, addr(0, 0), addr(9, 0)));
}

#[test]
fn ancestor_walk_terminates_on_malformed_topology() {
    let mut config = FakeConfigSpace::default();
    // Secondary pointing backwards — a cycle if followed naively.
    config.add_switch(addr(0, 0), device_id::KLP3636, 5);
    config.add_switch(addr(5, 0), device_id::KLP3636, 5);
    assert!(!is_parent_found(&config, addr(0, 0), addr(7, 0)));

    // Secondary of zero means the root was reached.
    let mut config = FakeConfigSpace::default();
    config.add_switch(addr(0, 0), device_id::KLP3636, 0);
    assert!(!is_parent_found(&config, addr(0, 0), addr(7, 0)));
}

#[test]
fn bar_probe_restores_original_values() {
    let mut config = FakeConfigSpace::default();
    let a = addr(0, 0);
    config.add_switch(a, device_id::KLP3636, 1);
    let original = config.reg(a, BAR0);

    let regions = probe_bars(&config, &FakeMapper::new(), a).unwrap();
    assert_eq!(regions.len(), 1);
    assert_eq!(regions[0].base(), 0x9000_0000);
    assert_eq!(regions[0].size(), 0x0010_0000);
    assert!(regions[0].is_memory());
    assert!(regions[0].is_mapped());

    // Probe must leave the BAR register exactly as it found it.
    assert_eq!(config.reg(a, BAR0), original);
    // And the write sequence is probe-then-restore.
    let writes = config.writes.borrow();
    assert_eq!(writes[0], (a, BAR0, 0xFFFF_FFFF));
    assert_eq!(writes[1], (a, BAR0, original));
}

#[test]
fn sixty_four_bit_bar_consumes_second_slot() {
    let mut config = FakeConfigSpace::default();
    let a = addr(0, 0);
    config.add_switch(a, device_id::KLP3636, 1);
    // 64-bit memory BAR (bit 2) with an upper address half in slot 1.
    config.set(a, BAR0, 0x8000_0004);
    config.bar_masks.insert((a, BAR0), 0xFFF0_0000);
    config.set(a, BAR0 + 4, 0x0000_0040);

    let regions = probe_bars(&config, &FakeMapper::new(), a).unwrap();
    assert_eq!(regions.len(), 1);
    assert!(regions[0].is_64bit());
    assert_eq!(regions[0].base(), 0x40_8000_0000);
    assert_eq!(regions[0].size(), 0x0010_0000);
}

#[test]
fn unmappable_bar0_discards_the_candidate() {
    let mut config = FakeConfigSpace::default();
    config.add_switch(addr(0, 0), device_id::KLP3636, 1);

    let registry = DeviceRegistry::scan(&config, &FakeMapper::failing()).unwrap();
    assert_eq!(registry.device_count(), 0);
}

#[test]
fn qualify_rejects_non_bridge_header() {
    let mut config = FakeConfigSpace::default();
    let a = addr(0, 0);
    config.add_switch(a, device_id::KLP3636, 1);
    config.set(a, HEADER, 0x0000 << 16); // endpoint header

    let err = qualify(&config, a).unwrap_err();
    assert!(matches!(err, FabricError::Unsupported { .. }));
}

#[test]
fn qualify_skips_unknown_kelpie_parts() {
    let mut config = FakeConfigSpace::default();
    let a = addr(0, 0);
    config.set(
        a,
        VENDOR_DEVICE,
        0x7777_0000 | u32::from(KELPIE_VENDOR_ID),
    );

    let err = qualify(&config, a).unwrap_err();
    assert!(matches!(err, FabricError::Ignore { .. }));
    assert!(err.is_skippable());
}

#[test]
fn registry_index_errors_are_invalid_parameter() {
    let config = FakeConfigSpace::default();
    let registry = DeviceRegistry::scan(&config, &FakeMapper::new()).unwrap();
    assert!(matches!(
        registry.device(0).unwrap_err(),
        FabricError::InvalidParameter { .. }
    ));
}
