#![no_main]

use std::collections::HashMap;

use cilgen::codegen::ParallelCopy;
use libfuzzer_sys::fuzz_target;

// Each byte pair is one copy `dest <- src` over 16 registers; 16 is the temporary.
fuzz_target!(|data: &[u8]| {
    let mut copies = ParallelCopy::new();
    let mut seen = [false; 16];
    for pair in data.chunks_exact(2) {
        let (dest, src) = (pair[0] % 16, pair[1] % 16);
        if seen[dest as usize] {
            continue;
        }
        seen[dest as usize] = true;
        copies.add(dest, src);
    }

    let mut registers: HashMap<u8, u32> = (0..=16).map(|r| (r, u32::from(r) * 1000)).collect();
    let mut expected = registers.clone();
    for &(dest, src) in copies.copies() {
        expected.insert(dest, registers[&src]);
    }

    let temps = copies
        .sequentialize(
            || Ok(16),
            |dest, src| {
                let value = registers[src];
                registers.insert(*dest, value);
                Ok(())
            },
        )
        .expect("copy sets with distinct destinations sequentialize");

    assert!(temps <= 1);
    for r in 0..16 {
        assert_eq!(registers[&r], expected[&r], "register {r}");
    }
});
