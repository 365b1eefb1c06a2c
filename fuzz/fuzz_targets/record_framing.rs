#![no_main]

use libfuzzer_sys::fuzz_target;
use oncrpc::RecordReader;

fuzz_target!(|data: &[u8]| {
    // Feed the input in two arbitrary-sized chunks to exercise the
    // incremental fragment-reassembly state machine across a boundary the
    // same way a real stream delivers partial reads.
    let mut reader = RecordReader::new(1 << 20);
    let split = data.len() / 2;
    let (a, b) = data.split_at(split);

    if reader.feed(a).is_err() {
        return;
    }
    if reader.record_ready() {
        let _ = reader.record();
        reader.end_record();
    }

    if reader.feed(b).is_err() {
        return;
    }
    if reader.record_ready() {
        let _ = reader.record();
        reader.end_record();
    }
});
