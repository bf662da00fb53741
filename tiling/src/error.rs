use snafu::Snafu;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Clone, PartialEq, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    #[snafu(context(false), display("{source}"))]
    Ir { source: kiln_ir::Error },

    #[snafu(display("{engine}: shape rank {shape} does not match stride ranks {external}/{local}"))]
    TransferRankMismatch { engine: String, shape: usize, external: usize, local: usize },

    #[snafu(display("{engine}: rank {rank} transfers are not supported"))]
    UnsupportedRank { engine: String, rank: usize },

    /// Hardware requires the innermost dimension to be contiguous on both sides.
    #[snafu(display("{engine}: innermost dimension is strided (external {external}, local {local})"))]
    NonContiguous { engine: String, external: usize, local: usize },

    #[snafu(display("{engine}: transfer of {bytes} bytes exceeds the {bits}-bit size budget"))]
    TransferTooLarge { engine: String, bytes: usize, bits: u32 },

    /// Rectangles of one batch minimize to different layouts.
    #[snafu(display("tile {tile} of {tensor:?} has layout {actual:?}, expected {expected:?}"))]
    LayoutMismatch { tensor: String, tile: usize, expected: Vec<usize>, actual: Vec<usize> },

    #[snafu(display("rectangle of rank {rank} does not fit {tensor:?} of rank {expected}"))]
    RectangleRank { tensor: String, rank: usize, expected: usize },

    #[snafu(display("buffer {name:?} has no assigned type"))]
    UntypedBuffer { name: String },

    #[snafu(display("{tensor:?} needs {required} staging slices, constraint provides {actual}"))]
    MultiBuffer { tensor: String, required: usize, actual: usize },

    #[snafu(display("operator {operator:?} has an empty tiling schedule"))]
    EmptySchedule { operator: String },

    #[snafu(display("{operator:?} schedules {tensor:?} for {actual} tiles, expected {expected}"))]
    TileCount { operator: String, tensor: String, expected: usize, actual: usize },
}
