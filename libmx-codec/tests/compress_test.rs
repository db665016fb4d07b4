use assert_matches::assert_matches;
use libmx_codec::*;

fn sample_body() -> Vec<u8> {
    (0..4096u32)
        .flat_map(|index| format!("line {index} of the body\n").into_bytes())
        .collect()
}

fn decode_in_pieces(mut decoder: StreamDecoder, input: &[u8], piece: usize) -> Vec<u8> {
    let mut output = Vec::new();
    for chunk in input.chunks(piece) {
        output.extend(decoder.decode(chunk).unwrap());
    }
    output.extend(decoder.finish().unwrap());
    output
}

#[test]
fn gzip_roundtrip() {
    let input = b"hello gzip";
    let compressed = gzip_compress(input).unwrap();
    let decompressed = gzip_decompress(&compressed).unwrap();
    assert_eq!(decompressed, input);
}

#[test]
fn deflate_roundtrip() {
    let input = b"hello deflate";
    let compressed = deflate_compress(input).unwrap();
    let decompressed = deflate_decompress(&compressed).unwrap();
    assert_eq!(decompressed, input);
}

#[test]
fn zlib_roundtrip() {
    let input = b"hello zlib";
    let compressed = zlib_compress(input).unwrap();
    let decompressed = zlib_decompress(&compressed).unwrap();
    assert_eq!(decompressed, input);
}

#[test]
fn gzip_invalid_errors() {
    let err = gzip_decompress(b"not gzip").unwrap_err();
    assert_matches!(err, CodecError::Compression(_));
}

#[test]
fn deflate_invalid_errors() {
    let err = deflate_decompress(b"not deflate").unwrap_err();
    assert_matches!(err, CodecError::Compression(_));
}

#[test]
fn stream_gzip_one_byte_at_a_time() {
    let body = sample_body();
    let compressed = gzip_compress(&body).unwrap();
    assert_eq!(decode_in_pieces(StreamDecoder::gzip(), &compressed, 1), body);
}

#[test]
fn stream_gzip_whole_buffer() {
    let body = sample_body();
    let compressed = gzip_compress(&body).unwrap();
    assert_eq!(
        decode_in_pieces(StreamDecoder::gzip(), &compressed, compressed.len()),
        body
    );
}

#[test]
fn stream_deflate_accepts_zlib_wrapper() {
    let body = sample_body();
    let compressed = zlib_compress(&body).unwrap();
    assert_eq!(decode_in_pieces(StreamDecoder::deflate(), &compressed, 7), body);
}

#[test]
fn stream_deflate_accepts_raw_stream() {
    let body = sample_body();
    let compressed = deflate_compress(&body).unwrap();
    assert_eq!(decode_in_pieces(StreamDecoder::deflate(), &compressed, 1), body);
}

#[test]
fn stream_ignores_bytes_after_end() {
    let mut compressed = gzip_compress(b"payload").unwrap();
    compressed.extend_from_slice(b"trailing garbage");
    let mut decoder = StreamDecoder::gzip();
    let mut output = decoder.decode(&compressed).unwrap();
    assert!(decoder.is_ended());
    output.extend(decoder.decode(b"more").unwrap());
    output.extend(decoder.finish().unwrap());
    assert_eq!(output, b"payload");
}

#[test]
fn stream_gzip_rejects_bad_header() {
    let mut decoder = StreamDecoder::gzip();
    let err = decoder.decode(b"this is definitely not gzip data").unwrap_err();
    assert_matches!(err, CodecError::Compression(_));
}

#[test]
fn stream_empty_deflate_body_is_empty() {
    let mut decoder = StreamDecoder::deflate();
    assert!(decoder.finish().unwrap().is_empty());
}

fn decode_cut_short(mut decoder: StreamDecoder, compressed: &[u8], keep: usize) -> CodecError {
    decoder.decode(&compressed[..keep]).unwrap();
    decoder.finish().unwrap_err()
}

#[test]
fn stream_deflate_rejects_truncated_raw_stream() {
    let compressed = deflate_compress(b"hello hello hello truncated world").unwrap();
    for keep in [compressed.len() / 2, compressed.len() - 1] {
        let err = decode_cut_short(StreamDecoder::deflate(), &compressed, keep);
        assert_matches!(err, CodecError::Compression(_), "kept {keep} bytes");
    }
}

#[test]
fn stream_deflate_rejects_zlib_without_checksum() {
    let body = sample_body();
    let compressed = zlib_compress(&body).unwrap();
    let err = decode_cut_short(StreamDecoder::deflate(), &compressed, compressed.len() - 4);
    assert_matches!(err, CodecError::Compression(_));
}

#[test]
fn stream_gzip_rejects_truncated_stream() {
    let compressed = gzip_compress(b"hello hello hello truncated world").unwrap();
    let err = decode_cut_short(StreamDecoder::gzip(), &compressed, compressed.len() - 4);
    assert_matches!(err, CodecError::Compression(_));
}

#[test]
fn stream_deflate_reports_end_of_stream() {
    let mut compressed = zlib_compress(b"complete").unwrap();
    compressed.extend_from_slice(b"junk");
    let mut decoder = StreamDecoder::deflate();
    let mut output = decoder.decode(&compressed).unwrap();
    assert!(decoder.is_ended());
    output.extend(decoder.finish().unwrap());
    assert_eq!(output, b"complete");
}
