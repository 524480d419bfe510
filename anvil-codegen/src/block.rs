//! The block layout: fixed-size code runs interleaved with relaxable jumps.
//!
//! The output stream is modeled as an ordered list of blocks. A *code* block
//! is an opaque run of already-encoded bytes whose size never changes once
//! written. A *jump* block holds exactly one control-flow instruction whose
//! size is still negotiable: it starts in the 2-byte short form and may be
//! promoted to the near form during relaxation. Keeping jumps in their own
//! blocks is what makes the relaxation pass a simple sweep over block sizes.

use smallvec::SmallVec;

use crate::binemit::CodeOffset;
use crate::entity::{Block, EntityRef, PrimaryMap};

/// Inline capacity of a code block's byte buffer. Runs longer than this
/// spill to the heap and double from there.
const CODE_BUF_INLINE: usize = 64;

/// Byte buffer of a code block.
pub type CodeBytes = SmallVec<[u8; CODE_BUF_INLINE]>;

/// The control-flow instruction held by a jump block.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum JumpKind {
    /// `EB rel8`.
    ShortJmp,
    /// `75 rel8`.
    ShortJnz,
    /// `E9 rel16/32`.
    NearJmp,
    /// `0F 85 rel16/32`.
    NearJnz,
}

impl JumpKind {
    /// Is this one of the 2-byte short forms?
    pub fn is_short(self) -> bool {
        matches!(self, Self::ShortJmp | Self::ShortJnz)
    }

    /// The near form encoding the same condition. Near forms promote to
    /// themselves; relaxation never demotes.
    pub fn promote(self) -> Self {
        match self {
            Self::ShortJmp | Self::NearJmp => Self::NearJmp,
            Self::ShortJnz | Self::NearJnz => Self::NearJnz,
        }
    }

    /// Encoded size in bytes. The near forms carry a 32-bit displacement in
    /// long mode and a 16-bit one otherwise.
    pub fn size(self, long_mode: bool) -> CodeOffset {
        match self {
            Self::ShortJmp | Self::ShortJnz => 2,
            Self::NearJmp => {
                if long_mode {
                    5
                } else {
                    3
                }
            }
            Self::NearJnz => {
                if long_mode {
                    6
                } else {
                    4
                }
            }
        }
    }
}

/// A jump target: symbolic until target binding runs, then a block id.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LabelRef {
    /// The label name as written in the source.
    Name(Box<[u8]>),
    /// The block the label was bound to.
    Resolved(Block),
}

/// Block payload.
#[derive(Clone, Debug)]
pub enum BlockData {
    /// A run of fixed-size instructions and data.
    Code {
        /// The encoded bytes.
        bytes: CodeBytes,
    },
    /// A single relaxable control-flow instruction.
    Jump {
        /// Current encoding form.
        kind: JumpKind,
        /// Where the jump goes.
        target: LabelRef,
        /// Signed distance from the end of this instruction to the target,
        /// valid after relaxation.
        disp: i32,
        /// Mode captured at creation; selects the near displacement width.
        long_mode: bool,
    },
}

/// A node in the layout: the payload plus the shared address/line header.
#[derive(Clone, Debug)]
pub struct BlockNode {
    /// Starting address, relative to the beginning of the code stream.
    /// Provisional until relaxation reaches its fixpoint.
    pub address: CodeOffset,
    /// Source line that opened this block.
    pub line: u32,
    /// The code run or jump instruction.
    pub data: BlockData,
}

impl BlockNode {
    /// Current size in bytes.
    pub fn size(&self) -> CodeOffset {
        match &self.data {
            BlockData::Code { bytes } => bytes.len() as CodeOffset,
            BlockData::Jump {
                kind, long_mode, ..
            } => kind.size(*long_mode),
        }
    }
}

/// The ordered block list making up the output stream.
pub struct Layout {
    blocks: PrimaryMap<Block, BlockNode>,
}

impl Layout {
    /// Create a layout holding the implicit empty head block at address 0.
    pub fn new() -> Self {
        let mut blocks = PrimaryMap::new();
        blocks.push(BlockNode {
            address: 0,
            line: 0,
            data: BlockData::Code {
                bytes: CodeBytes::new(),
            },
        });
        Self { blocks }
    }

    /// Number of blocks, including the head.
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    /// Is the layout still just the empty head block?
    pub fn is_empty(&self) -> bool {
        self.blocks.len() == 1 && self.blocks[self.tail()].size() == 0
    }

    /// Iterate over the blocks in layout order.
    pub fn blocks(&self) -> impl Iterator<Item = (Block, &BlockNode)> {
        self.blocks.iter()
    }

    /// The last block in layout order.
    pub fn tail(&self) -> Block {
        Block::new(self.blocks.len() - 1)
    }

    /// Total size of the code stream. Only meaningful once relaxation has
    /// made the addresses consistent.
    pub fn code_size(&self) -> CodeOffset {
        let tail = &self.blocks[self.tail()];
        tail.address + tail.size()
    }

    /// Get a writable byte buffer positioned at the end of the stream.
    ///
    /// This is the allocation protocol for fixed-size encodings: if the
    /// trailing block is a code block its buffer simply grows, and if it is
    /// a jump (whose size must stay negotiable) a fresh code block is opened
    /// right behind it.
    pub fn code_buf(&mut self, line: u32) -> &mut CodeBytes {
        let tail = self.tail();
        if matches!(self.blocks[tail].data, BlockData::Jump { .. }) {
            self.append_code_block(line);
        }
        let tail = self.tail();
        match &mut self.blocks[tail].data {
            BlockData::Code { bytes } => bytes,
            BlockData::Jump { .. } => unreachable!("tail is a fresh code block"),
        }
    }

    /// Finalize the current block and open a fresh empty code block, e.g.
    /// for a label definition. Returns the new block.
    pub fn append_code_block(&mut self, line: u32) -> Block {
        let address = self.code_size();
        self.blocks.push(BlockNode {
            address,
            line,
            data: BlockData::Code {
                bytes: CodeBytes::new(),
            },
        })
    }

    /// Finalize the current block and append a jump block in its initial
    /// short form, carrying the symbolic `target`.
    pub fn append_jump(
        &mut self,
        kind: JumpKind,
        target: Box<[u8]>,
        long_mode: bool,
        line: u32,
    ) -> Block {
        debug_assert!(kind.is_short(), "jumps start in the short form");
        let address = self.code_size();
        self.blocks.push(BlockNode {
            address,
            line,
            data: BlockData::Jump {
                kind,
                target: LabelRef::Name(target),
                disp: 0,
                long_mode,
            },
        })
    }

    /// Get the block node for `block`.
    pub fn node(&self, block: Block) -> &BlockNode {
        &self.blocks[block]
    }

    pub(crate) fn node_mut(&mut self, block: Block) -> &mut BlockNode {
        &mut self.blocks[block]
    }
}

impl Default for Layout {
    fn default() -> Self {
        Self::new()
    }
}
