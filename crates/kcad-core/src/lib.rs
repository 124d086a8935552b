//! KCAD 核心
//!
//! 地籍数据处理的领域模型与算法：
//! - 几何图元与地块模型（[`geometry`]、[`parcel`]）
//! - 坐标系分区表、横轴墨卡托投影与坐标转换引擎（[`crs`]、[`projection`]、[`transform`]）
//! - 拓扑校验与精度规整（[`topology`]、[`precision`]）
//! - 问题分类（[`issue`]）与制图样式表（[`layer`]、[`properties`]）
//!
//! # 示例
//!
//! ```rust
//! use kcad_core::prelude::*;
//!
//! let zones = ZoneTable::builtin();
//! let engine = TransformEngine::new(zones);
//! let msk = engine.resolve("МСК-23 зона 1").unwrap();
//! let gk = engine.resolve("СК-42 зона 7").unwrap();
//! let plan = engine.plan(&msk, &gk).unwrap();
//! let v = plan.apply(Vertex::new(1_310_000.0, 477_000.0)).unwrap();
//! assert!(v.x > 7_000_000.0);
//! ```

pub mod crs;
pub mod error;
pub mod geometry;
pub mod issue;
pub mod layer;
pub mod math;
pub mod parcel;
pub mod precision;
pub mod projection;
pub mod properties;
pub mod spatial;
pub mod topology;
pub mod transform;

pub use error::{CoreError, Result};

pub mod prelude {
    //! 常用类型的便捷导入
    pub use crate::crs::{CoordinateSystemReference, CrsKind, LocalFrame, ZoneTable};
    pub use crate::geometry::{Line, Ring, Vertex, Winding};
    pub use crate::issue::{IssueKind, IssueLocation, IssueLog, Severity, ValidationIssue, Verdict};
    pub use crate::layer::{LandCategory, LayerStyle, StyleTable};
    pub use crate::math::{BoundingBox2, Point2, Vector2};
    pub use crate::parcel::{CadastralNumber, Contour, ObjectKind, Parcel, RingId};
    pub use crate::precision::{PrecisionConfig, PrecisionNormalizer, PrecisionStats};
    pub use crate::properties::{Color, FillPattern, LineType, LineWeight};
    pub use crate::topology::{TopologyConfig, TopologyValidator};
    pub use crate::transform::{Transform2D, TransformEngine, TransformPlan};
}
