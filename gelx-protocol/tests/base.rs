#[macro_export]
macro_rules! bconcat {
    ($($part: expr)*) => {{
        #[allow(unused_mut)]
        let mut buf = bytes::BytesMut::new();
        $(
            buf.extend_from_slice($part);
        )*
        buf
    }};
}
