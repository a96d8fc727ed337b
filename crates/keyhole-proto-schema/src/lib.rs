mod convert;

pub mod shortener {
    pub mod v1 {
        tonic::include_proto!("shortener.v1");
    }
}

pub mod v1 {
    pub use crate::convert::ConversionError;
    pub use crate::shortener::v1::*;
}
