pub mod data {
    pub mod spectrum;
}

pub mod timstof {
    pub mod filter;
    pub mod merge;
}
