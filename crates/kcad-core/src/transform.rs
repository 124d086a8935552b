//! 坐标转换引擎
//!
//! - [`Transform2D`]：平面仿射变换，用于投影坐标与工程坐标系之间的换算
//! - [`Helmert2D`]：由同名点拟合的四参数转换
//! - [`TransformEngine`] / [`TransformPlan`]：任意两个坐标系之间的转换计划，
//!   正反向确定且可逆（往返误差远小于 0.01 米的输出精度）

use crate::crs::{CoordinateSystemReference, CrsKind, ZoneTable};
use crate::error::{CoreError, Result};
use crate::geometry::Vertex;
use crate::math::{Matrix3, Point2};
use crate::parcel::Parcel;
use crate::projection::{
    geocentric_to_geodetic, geodetic_to_geocentric, Ellipsoid, Helmert7, TransverseMercator,
};
use serde::{Deserialize, Serialize};

/// 2D仿射变换
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Transform2D {
    matrix: Matrix3,
}

impl Transform2D {
    /// 创建单位变换
    pub fn identity() -> Self {
        Self {
            matrix: Matrix3::identity(),
        }
    }

    /// 创建平移变换
    pub fn translation(dx: f64, dy: f64) -> Self {
        Self {
            matrix: Matrix3::new(
                1.0, 0.0, dx,
                0.0, 1.0, dy,
                0.0, 0.0, 1.0,
            ),
        }
    }

    /// 创建旋转变换（绕原点，逆时针）
    pub fn rotation(angle: f64) -> Self {
        let cos = angle.cos();
        let sin = angle.sin();
        Self {
            matrix: Matrix3::new(
                cos, -sin, 0.0,
                sin, cos, 0.0,
                0.0, 0.0, 1.0,
            ),
        }
    }

    /// 创建均匀缩放变换（绕原点）
    pub fn uniform_scale(s: f64) -> Self {
        Self {
            matrix: Matrix3::new(
                s, 0.0, 0.0,
                0.0, s, 0.0,
                0.0, 0.0, 1.0,
            ),
        }
    }

    /// 组合两个变换（self 在后，other 在前）
    pub fn then(&self, other: &Transform2D) -> Self {
        Self {
            matrix: self.matrix * other.matrix,
        }
    }

    /// 变换一个点
    pub fn transform_point(&self, point: &Point2) -> Point2 {
        let v = self.matrix * nalgebra::Vector3::new(point.x, point.y, 1.0);
        Point2::new(v.x, v.y)
    }

    /// 获取逆变换
    pub fn inverse(&self) -> Option<Self> {
        self.matrix.try_inverse().map(|m| Self { matrix: m })
    }
}

impl Default for Transform2D {
    fn default() -> Self {
        Self::identity()
    }
}

/// 四参数平面转换 X' = dx + s(X cosθ − Y sinθ)，Y' = dy + s(X sinθ + Y cosθ)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Helmert2D {
    pub dx: f64,
    pub dy: f64,
    pub scale: f64,
    /// 旋转角（弧度）
    pub rotation: f64,
    /// 拟合残差的均方根（米）
    pub rmse: f64,
}

impl Helmert2D {
    /// 最小二乘拟合，至少需要两对不重合的同名点
    pub fn fit(pairs: &[(Point2, Point2)]) -> Result<Self> {
        if pairs.len() < 2 {
            return Err(CoreError::Transform(
                "Helmert fit needs at least two control points".to_string(),
            ));
        }
        let n = pairs.len() as f64;
        let (mut sx, mut sy, mut tx, mut ty) = (0.0, 0.0, 0.0, 0.0);
        for (s, t) in pairs {
            sx += s.x;
            sy += s.y;
            tx += t.x;
            ty += t.y;
        }
        let (sx, sy, tx, ty) = (sx / n, sy / n, tx / n, ty / n);

        let (mut num_a, mut num_b, mut den) = (0.0, 0.0, 0.0);
        for (s, t) in pairs {
            let (x, y) = (s.x - sx, s.y - sy);
            let (u, v) = (t.x - tx, t.y - ty);
            num_a += x * u + y * v;
            num_b += x * v - y * u;
            den += x * x + y * y;
        }
        if den < crate::math::EPSILON {
            return Err(CoreError::Transform(
                "control points are coincident".to_string(),
            ));
        }
        let a = num_a / den;
        let b = num_b / den;

        let mut fitted = Self {
            dx: tx - a * sx + b * sy,
            dy: ty - b * sx - a * sy,
            scale: (a * a + b * b).sqrt(),
            rotation: b.atan2(a),
            rmse: 0.0,
        };
        let transform = fitted.to_transform();
        let sum_sq: f64 = pairs
            .iter()
            .map(|(s, t)| (transform.transform_point(s) - t).norm_squared())
            .sum();
        fitted.rmse = (sum_sq / n).sqrt();
        Ok(fitted)
    }

    pub fn to_transform(&self) -> Transform2D {
        Transform2D::translation(self.dx, self.dy)
            .then(&Transform2D::rotation(self.rotation))
            .then(&Transform2D::uniform_scale(self.scale))
    }
}

/// 转换计划中的单步
#[derive(Debug, Clone)]
enum Step {
    Affine(Transform2D),
    /// 平面 → 经纬度
    Unproject(TransverseMercator),
    /// 经纬度 → 平面
    Project(TransverseMercator),
    /// 本基准经纬度 → WGS-84 经纬度
    ToWgs84 {
        ellipsoid: Ellipsoid,
        helmert: Helmert7,
    },
    /// WGS-84 经纬度 → 本基准经纬度
    FromWgs84 {
        ellipsoid: Ellipsoid,
        helmert: Helmert7,
    },
}

impl Step {
    fn inverse(&self) -> Result<Step> {
        Ok(match self {
            Step::Affine(t) => Step::Affine(t.inverse().ok_or_else(|| {
                CoreError::Transform("affine transform is not invertible".to_string())
            })?),
            Step::Unproject(tm) => Step::Project(tm.clone()),
            Step::Project(tm) => Step::Unproject(tm.clone()),
            Step::ToWgs84 { ellipsoid, helmert } => Step::FromWgs84 {
                ellipsoid: *ellipsoid,
                helmert: helmert.clone(),
            },
            Step::FromWgs84 { ellipsoid, helmert } => Step::ToWgs84 {
                ellipsoid: *ellipsoid,
                helmert: helmert.clone(),
            },
        })
    }

    fn apply(&self, v: Vertex) -> Vertex {
        match self {
            Step::Affine(t) => v.moved_to(t.transform_point(&v.point())),
            Step::Unproject(tm) => {
                let (lon, lat) = tm.inverse(v.x, v.y);
                Vertex { x: lon, y: lat, z: v.z }
            }
            Step::Project(tm) => {
                let (e, n) = tm.forward(v.x, v.y);
                Vertex { x: e, y: n, z: v.z }
            }
            Step::ToWgs84 { ellipsoid, helmert } => match v.z {
                Some(h) => {
                    let (lon, lat, h) = datum_forward(ellipsoid, helmert, v.x, v.y, h);
                    Vertex::with_z(lon, lat, h)
                }
                None => {
                    let (lon, lat, _) = datum_forward(ellipsoid, helmert, v.x, v.y, 0.0);
                    Vertex::new(lon, lat)
                }
            },
            Step::FromWgs84 { ellipsoid, helmert } => match v.z {
                Some(h) => {
                    let g = geodetic_to_geocentric(&Ellipsoid::WGS84, v.x, v.y, h);
                    let (lon, lat, h) = geocentric_to_geodetic(ellipsoid, &helmert.inverse(&g));
                    Vertex::with_z(lon, lat, h)
                }
                None => {
                    // 无高程时按零高程反解：不动点迭代使正算结果回到输入
                    let target = (v.x, v.y);
                    let g = geodetic_to_geocentric(&Ellipsoid::WGS84, v.x, v.y, 0.0);
                    let (mut lon, mut lat, _) =
                        geocentric_to_geodetic(ellipsoid, &helmert.inverse(&g));
                    for _ in 0..8 {
                        let (flon, flat, _) = datum_forward(ellipsoid, helmert, lon, lat, 0.0);
                        let (dlon, dlat) = (target.0 - flon, target.1 - flat);
                        lon += dlon;
                        lat += dlat;
                        if dlon.abs() < 1e-15 && dlat.abs() < 1e-15 {
                            break;
                        }
                    }
                    Vertex::new(lon, lat)
                }
            },
        }
    }
}

fn datum_forward(
    ellipsoid: &Ellipsoid,
    helmert: &Helmert7,
    lon: f64,
    lat: f64,
    h: f64,
) -> (f64, f64, f64) {
    let g = geodetic_to_geocentric(ellipsoid, lon, lat, h);
    geocentric_to_geodetic(&Ellipsoid::WGS84, &helmert.forward(&g))
}

/// 两个坐标系之间的转换计划
#[derive(Debug, Clone)]
pub struct TransformPlan {
    source: CoordinateSystemReference,
    target: CoordinateSystemReference,
    steps: Vec<Step>,
}

impl TransformPlan {
    pub fn source(&self) -> &CoordinateSystemReference {
        &self.source
    }

    pub fn target(&self) -> &CoordinateSystemReference {
        &self.target
    }

    pub fn is_identity(&self) -> bool {
        self.steps.is_empty()
    }

    /// 反向计划
    pub fn inverse(&self) -> Result<TransformPlan> {
        let steps = self
            .steps
            .iter()
            .rev()
            .map(Step::inverse)
            .collect::<Result<Vec<_>>>()?;
        Ok(TransformPlan {
            source: self.target.clone(),
            target: self.source.clone(),
            steps,
        })
    }

    pub fn apply(&self, vertex: Vertex) -> Result<Vertex> {
        let out = self.steps.iter().fold(vertex, |v, step| step.apply(v));
        if out.is_finite() {
            Ok(out)
        } else {
            Err(CoreError::Transform(format!(
                "({}, {}) has no image in {}",
                vertex.x, vertex.y, self.target.id
            )))
        }
    }

    pub fn apply_points(&self, vertices: &mut [Vertex]) -> Result<()> {
        if self.is_identity() {
            return Ok(());
        }
        for v in vertices.iter_mut() {
            *v = self.apply(*v)?;
        }
        Ok(())
    }

    /// 改写地块全部坐标；失败时地块保持原样
    pub fn apply_parcel(&self, parcel: &mut Parcel) -> Result<()> {
        let mut transformed = parcel.contours.clone();
        for contour in transformed.iter_mut() {
            self.apply_points(&mut contour.outer.vertices)?;
            for hole in contour.holes.iter_mut() {
                self.apply_points(&mut hole.vertices)?;
            }
        }
        parcel.contours = transformed;
        parcel.crs = Some(self.target.clone());
        parcel.computed_area = None;
        Ok(())
    }
}

/// 坐标转换引擎，持有分区表的只读引用
#[derive(Debug, Clone, Copy)]
pub struct TransformEngine<'a> {
    zones: &'a ZoneTable,
}

impl<'a> TransformEngine<'a> {
    pub fn new(zones: &'a ZoneTable) -> Self {
        Self { zones }
    }

    pub fn zones(&self) -> &'a ZoneTable {
        self.zones
    }

    /// 解析坐标系标识
    pub fn resolve(&self, ident: &str) -> Result<CoordinateSystemReference> {
        self.zones.resolve(ident)
    }

    /// 生成转换计划
    pub fn plan(
        &self,
        source: &CoordinateSystemReference,
        target: &CoordinateSystemReference,
    ) -> Result<TransformPlan> {
        let mut steps = Vec::new();
        if source != target {
            let (source_root, source_local) = strip_local(source);
            let (target_root, target_local) = strip_local(target);

            if let Some(t) = source_local {
                steps.push(Step::Affine(t));
            }
            if source_root != target_root {
                steps.extend(to_geodetic(source_root));
                if !source_root.same_datum(target_root) {
                    if let Some(shift) = &source_root.to_wgs84 {
                        steps.push(Step::ToWgs84 {
                            ellipsoid: source_root.ellipsoid,
                            helmert: Helmert7::new(shift)?,
                        });
                    }
                    if let Some(shift) = &target_root.to_wgs84 {
                        steps.push(Step::FromWgs84 {
                            ellipsoid: target_root.ellipsoid,
                            helmert: Helmert7::new(shift)?,
                        });
                    }
                }
                if let Some(tm) = projection_of(target_root) {
                    steps.push(Step::Project(tm));
                }
            }
            if let Some(t) = target_local {
                let inverse = t.inverse().ok_or_else(|| {
                    CoreError::Transform(format!("local frame {} is not invertible", target.id))
                })?;
                steps.push(Step::Affine(inverse));
            }
        }
        Ok(TransformPlan {
            source: source.clone(),
            target: target.clone(),
            steps,
        })
    }
}

/// 剥离工程坐标系，返回底层坐标系和 局部→底层 的合成变换
fn strip_local(crs: &CoordinateSystemReference) -> (&CoordinateSystemReference, Option<Transform2D>) {
    match &crs.kind {
        CrsKind::Local { base, frame } => {
            let (root, inner) = strip_local(base);
            let outer = frame.to_projected();
            let combined = match inner {
                Some(inner) => inner.then(&outer),
                None => outer,
            };
            (root, Some(combined))
        }
        _ => (crs, None),
    }
}

fn projection_of(crs: &CoordinateSystemReference) -> Option<TransverseMercator> {
    crs.projection.map(TransverseMercator::new)
}

fn to_geodetic(crs: &CoordinateSystemReference) -> Option<Step> {
    projection_of(crs).map(Step::Unproject)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crs::LocalFrame;
    use crate::math::approx_eq;

    fn engine() -> TransformEngine<'static> {
        TransformEngine::new(ZoneTable::builtin())
    }

    fn assert_roundtrip(plan: &TransformPlan, v: Vertex) {
        let forward = plan.apply(v).unwrap();
        let back = plan.inverse().unwrap().apply(forward).unwrap();
        let d = ((back.x - v.x).powi(2) + (back.y - v.y).powi(2)).sqrt();
        assert!(d < 1e-6, "round trip error {} for {:?}", d, v);
    }

    #[test]
    fn test_transform_point() {
        let t = Transform2D::translation(10.0, 20.0);
        let p = t.transform_point(&Point2::new(5.0, 5.0));
        assert!(approx_eq(p.x, 15.0));
        assert!(approx_eq(p.y, 25.0));

        let r = Transform2D::rotation(std::f64::consts::FRAC_PI_2);
        let p = r.transform_point(&Point2::new(1.0, 0.0));
        assert!(approx_eq(p.x, 0.0));
        assert!(approx_eq(p.y, 1.0));
    }

    #[test]
    fn test_identity_plan() {
        let crs = engine().resolve("МСК-23 зона 1").unwrap();
        let plan = engine().plan(&crs, &crs).unwrap();
        assert!(plan.is_identity());
        let v = Vertex::new(1_300_100.0, 480_200.0);
        assert_eq!(plan.apply(v).unwrap(), v);
    }

    #[test]
    fn test_msk_to_gauss_kruger_roundtrip() {
        let e = engine();
        let msk = e.resolve("МСК-23 зона 1").unwrap();
        let gk = e.resolve("СК-42 зона 7").unwrap();
        let plan = e.plan(&msk, &gk).unwrap();

        let v = Vertex::new(1_310_523.17, 476_912.48);
        let out = plan.apply(v).unwrap();
        // 7 带假东偏 7 500 000，结果应落在该带内
        assert!(out.x > 7_000_000.0 && out.x < 8_000_000.0);
        assert_roundtrip(&plan, v);
    }

    #[test]
    fn test_msk_to_wgs84_roundtrip() {
        let e = engine();
        let msk = e.resolve("МСК-50 зона 1").unwrap();
        let plan = e.plan(&msk, &CoordinateSystemReference::wgs84()).unwrap();
        let v = Vertex::new(1_252_340.55, 472_118.9);
        let out = plan.apply(v).unwrap();
        assert!((out.x - 37.5).abs() < 1.0);
        assert!(out.y > 55.0 && out.y < 57.0);
        assert!(out.z.is_none());
        assert_roundtrip(&plan, v);
        assert_roundtrip(&plan, Vertex::with_z(1_252_340.55, 472_118.9, 150.0));
    }

    #[test]
    fn test_between_msk_datums() {
        let e = engine();
        let msk77 = e.resolve("МСК-77").unwrap();
        let msk50 = e.resolve("МСК-50 зона 1").unwrap();
        let plan = e.plan(&msk77, &msk50).unwrap();
        assert_roundtrip(&plan, Vertex::new(1_523.4, -2_840.77));
    }

    #[test]
    fn test_local_frame() {
        let e = engine();
        let base = e.resolve("МСК-23 зона 1").unwrap();
        let frame = LocalFrame {
            name: "Площадка-1".to_string(),
            origin_x: 1_300_000.0,
            origin_y: 480_000.0,
            rotation_deg: 90.0,
            scale: 1.0,
        };
        let local = CoordinateSystemReference::local(base.clone(), frame).unwrap();
        let plan = e.plan(&local, &base).unwrap();

        let out = plan.apply(Vertex::new(10.0, 0.0)).unwrap();
        assert!((out.x - 1_300_000.0).abs() < 1e-9);
        assert!((out.y - 480_010.0).abs() < 1e-9);
        assert_roundtrip(&plan, Vertex::new(12.5, -40.25));

        // 工程坐标系到另一投影坐标系经由其底层坐标系
        let gk = e.resolve("СК-42 зона 7").unwrap();
        assert_roundtrip(&e.plan(&local, &gk).unwrap(), Vertex::new(100.0, 200.0));
    }

    #[test]
    fn test_helmert_fit() {
        let truth = Helmert2D {
            dx: 1_000.0,
            dy: -250.0,
            scale: 1.0002,
            rotation: 0.01,
            rmse: 0.0,
        }
        .to_transform();
        let sources = [
            Point2::new(0.0, 0.0),
            Point2::new(100.0, 0.0),
            Point2::new(100.0, 100.0),
            Point2::new(0.0, 100.0),
        ];
        let pairs: Vec<(Point2, Point2)> = sources
            .iter()
            .map(|p| (*p, truth.transform_point(p)))
            .collect();
        let fitted = Helmert2D::fit(&pairs).unwrap();
        assert!((fitted.scale - 1.0002).abs() < 1e-9);
        assert!((fitted.rotation - 0.01).abs() < 1e-9);
        assert!(fitted.rmse < 1e-6);
        assert!(Helmert2D::fit(&pairs[..1]).is_err());
    }
}
