use std::io;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error(
        "Tried to write {requested} bytes into a ring buffer with only \
         {free} free bytes"
    )]
    BufferOverflow { requested: usize, free: usize },

    #[error(
        "Tried to read {requested} bytes from a ring buffer holding only \
         {available} bytes"
    )]
    BufferUnderflow { requested: usize, available: usize },

    #[error(
        "Refusing to allocate a receive buffer of {0} bytes, the maximum is \
         {1} bytes"
    )]
    ReceiveBufferLimit(usize, usize),

    #[error("Frame of {0} bytes is larger than the maximum of {1} bytes")]
    FrameTooLarge(usize, usize),

    #[error(
        "Could not decode the payload, the last attempt assumed compressed = \
         {compressed}"
    )]
    Decode {
        compressed: bool,
        #[source]
        source: speedy::Error,
    },

    #[error("Error when serializing/deserializing")]
    SpeedyError(#[from] speedy::Error),

    #[error("IO error")]
    IO(#[from] io::Error),

    #[error("The peer closed the connection in the middle of a frame")]
    ConnectionClosed,

    #[error("Received a chunk at offset {0} outside of the file range")]
    ChunkOutOfRange(u64),

    #[error(
        "Could not open the folder `{0}`. Please make sure the program has \
         permission to open it and that the folder exist"
    )]
    FolderOpenError(String),

    #[error(
        "Tried to load $HOME but could not find it. Please make sure you have \
         a $HOME env and that this program has the permission to create dirs."
    )]
    HomeInvalid,

    #[error(
        "Error while trying to read the configuration file, please make sure \
         it has the correct format"
    )]
    ConfigDeserializeError(#[from] toml::de::Error),

    #[error("Could not write the default configuration")]
    ConfigSerializeError(#[from] toml::ser::Error),
}
