#![no_main]

use libfuzzer_sys::fuzz_target;
use voltage_s7::S7Address;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    if let Ok(address) = S7Address::parse(text) {
        // canonical text must parse back to the same address
        let again = S7Address::parse(&address.to_string()).expect("canonical form parses");
        assert_eq!(again, address);
        assert_eq!(address.allocate().len(), address.byte_size());
    }
});
