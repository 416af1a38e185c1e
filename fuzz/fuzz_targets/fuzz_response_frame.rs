#![no_main]

use libfuzzer_sys::fuzz_target;
use voltage_s7::{S7Address, S7Codec, WireItem};

fuzz_target!(|data: &[u8]| {
    let Ok(pdu) = S7Codec::decode_frame(data) else {
        return;
    };
    let mut items: Vec<WireItem> = ["VW0", "VB3.5", "V1.1", "MD4"]
        .iter()
        .map(|t| WireItem::for_read(*t, S7Address::parse(t).unwrap()))
        .collect();
    for count in 0..=items.len() {
        let _ = S7Codec::parse_read_response(&pdu, &mut items[..count]);
        let _ = S7Codec::parse_write_response(&pdu, &mut items[..count]);
    }
    let _ = S7Codec::parse_setup_response(&pdu);
});
