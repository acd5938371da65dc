pub mod data {
    pub mod acquisition;
    pub mod raw;
    pub mod meta;
    pub mod frame;
    pub mod handle;
    pub mod scan;
    pub mod dda;
    pub mod dataset;
}

pub mod error;
