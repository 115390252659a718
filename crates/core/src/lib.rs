pub mod gen_table;

pub use gen_table::{
    CellCompletionChunk, CellReferences, ChunkError, GenTableClient, GenTableError,
    GenTableStream, GenTableStreamEvent, RowAddRequest, RowRegenRequest, TableImportRequest,
    TableType,
};
