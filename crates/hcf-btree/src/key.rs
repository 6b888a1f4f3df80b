use std::fmt::Debug;

use hcf_types::{Decoder, Encoder, FormatParams, HeapOffset, TypeError};

/// A fixed-size key stored between child pointers.
pub trait BtreeKey: Clone + Debug + PartialEq + Send + 'static {
    fn encoded_size(params: &FormatParams) -> usize;
    fn encode(&self, enc: &mut Encoder<'_>) -> Result<(), TypeError>;
    fn decode(dec: &mut Decoder<'_>) -> Result<Self, TypeError>;
}

/// Symbol tables key their nodes by the heap offset of a member name.
impl BtreeKey for HeapOffset {
    fn encoded_size(params: &FormatParams) -> usize {
        params.sizeof_size as usize
    }

    fn encode(&self, enc: &mut Encoder<'_>) -> Result<(), TypeError> {
        enc.put_offset(*self)
    }

    fn decode(dec: &mut Decoder<'_>) -> Result<Self, TypeError> {
        dec.get_offset()
    }
}
