#![no_main]

use libfuzzer_sys::fuzz_target;
use oncrpc::xdr::{MemorySink, MemorySource};
use oncrpc::{decode_message_header, encode_call, encode_reply, MessageHeader};

fuzz_target!(|data: &[u8]| {
    let mut src = MemorySource::new(data);
    let Ok(header) = decode_message_header(&mut src) else {
        return;
    };

    let mut sink = MemorySink::new();
    match &header {
        MessageHeader::Call { xid, call } => encode_call(&mut sink, *xid, call).unwrap(),
        MessageHeader::Reply { xid, reply } => encode_reply(&mut sink, *xid, reply).unwrap(),
    }
    let reencoded = sink.into_inner();

    let mut src2 = MemorySource::new(&reencoded);
    let header2 = decode_message_header(&mut src2).expect("a header we just encoded must decode");
    assert_eq!(header, header2);
});
