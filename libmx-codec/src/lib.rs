mod compress;
mod encode;
mod error;
mod hash;

pub use compress::{
    StreamDecoder, deflate_compress, deflate_decompress, gzip_compress, gzip_decompress,
    zlib_compress, zlib_decompress,
};
pub use encode::{
    base64_decode, base64_encode, form_url_decode, url_decode_bytes, url_decode_str,
    url_encode_bytes, url_encode_str,
};
pub use error::CodecError;
pub use hash::{sha1_digest, sha1_hex, websocket_accept_key};
