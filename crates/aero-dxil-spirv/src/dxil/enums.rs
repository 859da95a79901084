//! DXIL enumerations as they appear in metadata tuples and `dx.op` call operands.

use bitflags::bitflags;

macro_rules! dxil_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident {
            $($(#[$vmeta:meta])* $variant:ident = $value:expr,)+
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum $name {
            $($(#[$vmeta])* $variant,)+
        }

        impl $name {
            pub fn from_raw(raw: u32) -> Option<Self> {
                match raw {
                    $($value => Some(Self::$variant),)+
                    _ => None,
                }
            }

            pub fn raw(self) -> u32 {
                match self {
                    $(Self::$variant => $value,)+
                }
            }
        }
    };
}

dxil_enum! {
    /// Resource binding class. Also the `resourceClass` operand of `createHandle`.
    pub enum ResourceClass {
        Srv = 0,
        Uav = 1,
        Cbv = 2,
        Sampler = 3,
    }
}

dxil_enum! {
    pub enum ResourceKind {
        Invalid = 0,
        Texture1D = 1,
        Texture2D = 2,
        Texture2DMS = 3,
        Texture3D = 4,
        TextureCube = 5,
        Texture1DArray = 6,
        Texture2DArray = 7,
        Texture2DMSArray = 8,
        TextureCubeArray = 9,
        TypedBuffer = 10,
        RawBuffer = 11,
        StructuredBuffer = 12,
        CBuffer = 13,
        Sampler = 14,
        TBuffer = 15,
        RTAccelerationStructure = 16,
        FeedbackTexture2D = 17,
        FeedbackTexture2DArray = 18,
    }
}

impl ResourceKind {
    pub fn is_buffer(self) -> bool {
        matches!(
            self,
            Self::TypedBuffer | Self::RawBuffer | Self::StructuredBuffer
        )
    }

    /// Raw and structured buffers, which are addressed in 32-bit words.
    pub fn is_raw_or_structured(self) -> bool {
        matches!(self, Self::RawBuffer | Self::StructuredBuffer)
    }

    pub fn is_arrayed(self) -> bool {
        matches!(
            self,
            Self::Texture1DArray
                | Self::Texture2DArray
                | Self::Texture2DMSArray
                | Self::TextureCubeArray
        )
    }

    pub fn is_multisampled(self) -> bool {
        matches!(self, Self::Texture2DMS | Self::Texture2DMSArray)
    }

    /// Number of integer coordinates used to address a texel, including the array layer.
    pub fn fetch_coordinate_count(self) -> u32 {
        match self {
            Self::Texture1D | Self::TypedBuffer | Self::RawBuffer | Self::StructuredBuffer => 1,
            Self::Texture1DArray | Self::Texture2D | Self::Texture2DMS => 2,
            Self::Texture2DArray | Self::Texture2DMSArray | Self::Texture3D => 3,
            Self::TextureCube => 3,
            Self::TextureCubeArray => 4,
            _ => 0,
        }
    }

    /// Number of float coordinates used when sampling, including the array layer.
    pub fn sample_coordinate_count(self) -> u32 {
        match self {
            Self::Texture1D => 1,
            Self::Texture1DArray | Self::Texture2D => 2,
            Self::Texture2DArray | Self::Texture3D | Self::TextureCube => 3,
            Self::TextureCubeArray => 4,
            _ => 0,
        }
    }

    /// Number of texel offset components accepted by the kind.
    pub fn offset_count(self) -> u32 {
        match self {
            Self::Texture1D | Self::Texture1DArray => 1,
            Self::Texture2D | Self::Texture2DArray | Self::Texture2DMS | Self::Texture2DMSArray => 2,
            Self::Texture3D => 3,
            _ => 0,
        }
    }
}

dxil_enum! {
    pub enum ComponentType {
        Invalid = 0,
        I1 = 1,
        I16 = 2,
        U16 = 3,
        I32 = 4,
        U32 = 5,
        I64 = 6,
        U64 = 7,
        F16 = 8,
        F32 = 9,
        F64 = 10,
        SNormF16 = 11,
        UNormF16 = 12,
        SNormF32 = 13,
        UNormF32 = 14,
        SNormF64 = 15,
        UNormF64 = 16,
    }
}

impl ComponentType {
    /// Folds normalized formats onto the float type they are read as.
    pub fn storage_type(self) -> Self {
        match self {
            Self::SNormF16 | Self::UNormF16 => Self::F16,
            Self::SNormF32 | Self::UNormF32 => Self::F32,
            Self::SNormF64 | Self::UNormF64 => Self::F64,
            other => other,
        }
    }

    pub fn is_16bit(self) -> bool {
        matches!(
            self.storage_type(),
            Self::F16 | Self::I16 | Self::U16
        )
    }
}

dxil_enum! {
    /// System-value semantic of a signature element.
    pub enum Semantic {
        User = 0,
        VertexID = 1,
        InstanceID = 2,
        Position = 3,
        RenderTargetArrayIndex = 4,
        ViewPortArrayIndex = 5,
        ClipDistance = 6,
        CullDistance = 7,
        OutputControlPointID = 8,
        DomainLocation = 9,
        PrimitiveID = 10,
        GSInstanceID = 11,
        SampleIndex = 12,
        IsFrontFace = 13,
        Coverage = 14,
        InnerCoverage = 15,
        Target = 16,
        Depth = 17,
        DepthLessEqual = 18,
        DepthGreaterEqual = 19,
        StencilRef = 20,
        DispatchThreadID = 21,
        GroupID = 22,
        GroupIndex = 23,
        GroupThreadID = 24,
        TessFactor = 25,
        InsideTessFactor = 26,
        ViewID = 27,
        Barycentrics = 28,
    }
}

dxil_enum! {
    pub enum InterpolationMode {
        Undefined = 0,
        Constant = 1,
        Linear = 2,
        LinearCentroid = 3,
        LinearNoperspective = 4,
        LinearNoperspectiveCentroid = 5,
        LinearSample = 6,
        LinearNoperspectiveSample = 7,
    }
}

dxil_enum! {
    pub enum ShaderKind {
        Pixel = 0,
        Vertex = 1,
        Geometry = 2,
        Hull = 3,
        Domain = 4,
        Compute = 5,
        Library = 6,
        RayGeneration = 7,
        Intersection = 8,
        AnyHit = 9,
        ClosestHit = 10,
        Miss = 11,
        Callable = 12,
        Mesh = 13,
        Amplification = 14,
    }
}

dxil_enum! {
    /// Tags of the entry-point property list (operand 4 of an entry-point tuple).
    pub enum ShaderPropertyTag {
        ShaderFlags = 0,
        GSState = 1,
        DSState = 2,
        HSState = 3,
        NumThreads = 4,
        AutoBindingSpace = 5,
        RayPayloadSize = 6,
        RayAttribSize = 7,
        ShaderKind = 8,
    }
}

dxil_enum! {
    pub enum TessellatorDomain {
        Undefined = 0,
        IsoLine = 1,
        Tri = 2,
        Quad = 3,
    }
}

dxil_enum! {
    pub enum TessellatorPartitioning {
        Undefined = 0,
        Integer = 1,
        Pow2 = 2,
        FractionalOdd = 3,
        FractionalEven = 4,
    }
}

dxil_enum! {
    pub enum TessellatorOutputPrimitive {
        Undefined = 0,
        Point = 1,
        Line = 2,
        TriangleCW = 3,
        TriangleCCW = 4,
    }
}

dxil_enum! {
    pub enum InputPrimitive {
        Undefined = 0,
        Point = 1,
        Line = 2,
        Triangle = 3,
        LineWithAdjacency = 6,
        TriangleWithAdjacency = 7,
    }
}

dxil_enum! {
    pub enum PrimitiveTopology {
        Undefined = 0,
        PointList = 1,
        LineList = 2,
        LineStrip = 3,
        TriangleList = 4,
        TriangleStrip = 5,
    }
}

dxil_enum! {
    /// `atomicOp` operand of `dx.op.atomicBinOp`.
    pub enum AtomicBinOp {
        Add = 0,
        And = 1,
        Or = 2,
        Xor = 3,
        IMin = 4,
        IMax = 5,
        UMin = 6,
        UMax = 7,
        Exchange = 8,
    }
}

dxil_enum! {
    /// `dx.op` opcodes understood by the translator.
    pub enum DxOp {
        LoadInput = 4,
        StoreOutput = 5,
        FAbs = 6,
        Saturate = 7,
        IsNaN = 8,
        IsInf = 9,
        Cos = 12,
        Sin = 13,
        Tan = 14,
        Acos = 15,
        Asin = 16,
        Atan = 17,
        Exp = 21,
        Frc = 22,
        Log = 23,
        Sqrt = 24,
        Rsqrt = 25,
        RoundNe = 26,
        RoundNi = 27,
        RoundPi = 28,
        RoundZ = 29,
        Bfrev = 30,
        Countbits = 31,
        FMax = 35,
        FMin = 36,
        IMax = 37,
        IMin = 38,
        UMax = 39,
        UMin = 40,
        FMad = 46,
        Fma = 47,
        IMad = 48,
        UMad = 49,
        Dot2 = 54,
        Dot3 = 55,
        Dot4 = 56,
        CreateHandle = 57,
        CBufferLoadLegacy = 59,
        Sample = 60,
        SampleLevel = 62,
        TextureLoad = 66,
        TextureStore = 67,
        BufferLoad = 68,
        BufferStore = 69,
        BufferUpdateCounter = 70,
        CheckAccessFullyMapped = 71,
        RenderTargetGetSampleCount = 77,
        AtomicBinOp = 78,
        AtomicCompareExchange = 79,
        Barrier = 80,
        Discard = 82,
        ThreadId = 93,
        GroupId = 94,
        ThreadIdInGroup = 95,
        FlattenedThreadIdInGroup = 96,
        EmitStream = 97,
        CutStream = 98,
        EmitThenCutStream = 99,
        GSInstanceID = 100,
        LoadPatchConstant = 104,
        DomainLocation = 105,
        StorePatchConstant = 106,
        OutputControlPointID = 107,
        PrimitiveID = 108,
        RawBufferLoad = 139,
        RawBufferStore = 140,
        TraceRay = 157,
        CreateHandleForLib = 160,
    }
}

impl DxOp {
    /// Opcodes whose result is a `ResRet` aggregate that may carry a residency status in field 4.
    pub fn returns_resource_data(self) -> bool {
        matches!(
            self,
            Self::Sample
                | Self::SampleLevel
                | Self::TextureLoad
                | Self::BufferLoad
                | Self::RawBufferLoad
        )
    }
}

bitflags! {
    /// Entry-point `ShaderFlags` property bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ShaderFlags: u64 {
        const DISABLE_OPTIMIZATIONS = 1 << 0;
        const DISABLE_MATH_REFACTORING = 1 << 1;
        const ENABLE_DOUBLE_PRECISION = 1 << 2;
        const FORCE_EARLY_DEPTH_STENCIL = 1 << 3;
    }
}

bitflags! {
    /// `barrierMode` operand of `dx.op.barrier`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct BarrierMode: u32 {
        const SYNC_THREAD_GROUP = 1 << 0;
        const UAV_FENCE_GLOBAL = 1 << 1;
        const UAV_FENCE_THREAD_GROUP = 1 << 2;
        const TGSM_FENCE = 1 << 3;
    }
}
