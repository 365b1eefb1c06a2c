use criterion::{black_box, criterion_group, criterion_main, Criterion};

use oncrpc::auth::gss::window::ReplayWindow;
use oncrpc::xdr::{MemorySink, MemorySource};
use oncrpc::{
    decode_message_header, encode_call, encode_reply, AcceptedStat, CallHeader, MessageHeader,
    OpaqueAuth, RecordReader, RecordWriter, ReplyHeader, RPC_VERSION,
};

fn call_header() -> CallHeader {
    CallHeader {
        rpc_vers: RPC_VERSION,
        prog: 100003,
        vers: 4,
        proc: 1,
        cred: OpaqueAuth::none(),
        verf: OpaqueAuth::none(),
    }
}

pub fn xdr_message_header(c: &mut Criterion) {
    let call = call_header();

    c.bench_function("encode_call_header", |b| {
        b.iter(|| {
            let mut sink = MemorySink::new();
            encode_call(&mut sink, 4242, black_box(&call)).unwrap();
            black_box(sink.into_inner())
        })
    });

    let mut encoded = MemorySink::new();
    encode_call(&mut encoded, 4242, &call).unwrap();
    let encoded = encoded.into_inner();

    c.bench_function("decode_call_header", |b| {
        b.iter(|| {
            let mut src = MemorySource::new(black_box(&encoded));
            black_box(decode_message_header(&mut src).unwrap())
        })
    });

    let reply = ReplyHeader::Accepted {
        verf: OpaqueAuth::none(),
        stat: AcceptedStat::Success,
    };
    let mut encoded_reply = MemorySink::new();
    encode_reply(&mut encoded_reply, 4242, &reply).unwrap();
    let encoded_reply = encoded_reply.into_inner();

    c.bench_function("decode_reply_header", |b| {
        b.iter(|| {
            let mut src = MemorySource::new(black_box(&encoded_reply));
            match decode_message_header(&mut src).unwrap() {
                MessageHeader::Reply { xid, reply } => black_box((xid, reply)),
                _ => unreachable!(),
            }
        })
    });
}

pub fn record_framing(c: &mut Criterion) {
    let payload = vec![0x5au8; 8192];

    c.bench_function("record_frame_8k", |b| {
        b.iter(|| {
            let mut writer = RecordWriter::new();
            writer.write(black_box(&payload));
            black_box(writer.push_record())
        })
    });

    let mut writer = RecordWriter::new();
    writer.write(&payload);
    let framed = writer.push_record();

    c.bench_function("record_reassemble_8k", |b| {
        b.iter(|| {
            let mut reader = RecordReader::default();
            reader.feed(black_box(&framed)).unwrap();
            black_box(reader.record_ready())
        })
    });
}

pub fn gss_replay_window(c: &mut Criterion) {
    c.bench_function("replay_window_check_and_set", |b| {
        let mut window = ReplayWindow::new();
        let mut seq = 1u32;
        b.iter(|| {
            seq += 1;
            black_box(window.check_and_set(black_box(seq)))
        })
    });
}

criterion_group!(benches, xdr_message_header, record_framing, gss_replay_window);
criterion_main!(benches);
