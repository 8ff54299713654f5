//! Ready-made device emulators

pub mod card_reader;
mod io_board;

pub use card_reader::{
    CardReader, CardReaderConfig, CardSource, CardState, ReaderStatus, STATUS_SIZE, SensorFlags,
};
pub use io_board::{IoBoard, IoBoardConfig, StateSource};
