use bytes::BytesMut;
use chrono::Duration;
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use takrelay_cot::{decode_frame, encode_frame, Contact, Detail, Event, FrameCodec, Point};
use tokio_util::codec::Decoder;

fn create_test_event() -> Event {
    let mut event = Event::new("BENCH-TEST-001", "a-f-G-U-C", Duration::minutes(5));
    event.point = Point::with_accuracy(37.7749, -122.4194, 100.0, 10.0, 5.0);
    event.detail = Some(Detail {
        xml_detail: Some(r#"<marti><dest callsign="Bravo"/></marti>"#.to_string()),
        contact: Some(Contact {
            endpoint: Some("*:-1:stcp".to_string()),
            callsign: "Alpha-1".to_string(),
        }),
        ..Detail::default()
    });
    event
}

fn bench_frames(c: &mut Criterion) {
    let event = create_test_event();
    let frame = encode_frame(&event);

    c.bench_function("encode_frame", |b| b.iter(|| encode_frame(black_box(&event))));

    c.bench_function("decode_frame", |b| b.iter(|| decode_frame(black_box(&frame))));

    c.bench_function("codec_decode_stream_of_100", |b| {
        let stream: Vec<u8> = frame.iter().copied().cycle().take(frame.len() * 100).collect();
        b.iter(|| {
            let mut codec = FrameCodec::new();
            let mut buf = BytesMut::from(stream.as_slice());
            let mut count = 0;
            while let Ok(Some(_)) = codec.decode(&mut buf) {
                count += 1;
            }
            black_box(count)
        })
    });

    c.bench_function("dest_callsigns", |b| {
        b.iter(|| black_box(&event).dest_callsigns())
    });
}

criterion_group!(benches, bench_frames);
criterion_main!(benches);
