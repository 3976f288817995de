pub trait ProtocolEncode<'en, Context = ()> {
    fn encode(&self, buf: &mut Vec<u8>)
    where
        Self: ProtocolEncode<'en, ()>,
    {
        self.encode_with(buf, ())
    }

    fn encode_with(&self, buf: &mut Vec<u8>, context: Context);
}

// raw byte payloads (auth responses, key requests) pass through untouched
impl<C> ProtocolEncode<'_, C> for &'_ [u8] {
    fn encode_with(&self, buf: &mut Vec<u8>, _: C) {
        buf.extend_from_slice(self);
    }
}
