//! 几何图元
//!
//! 地块边界由闭合环（[`Ring`]）组成，本模块提供环与线段的基础运算：
//! 面积（鞋带公式）、周长、质心、点位判断、线段求交和内部代表点。

use crate::math::{cross, BoundingBox2, Point2, Vector2, EPSILON};
use serde::{Deserialize, Serialize};

/// 接触判定的距离阈值（米），远小于业务容差
pub const TOUCH_TOLERANCE: f64 = 1e-9;

/// 边界顶点，可选高程
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Vertex {
    pub x: f64,
    pub y: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub z: Option<f64>,
}

impl Vertex {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y, z: None }
    }

    pub fn with_z(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z: Some(z) }
    }

    /// 平面位置
    #[inline]
    pub fn point(&self) -> Point2 {
        Point2::new(self.x, self.y)
    }

    /// 替换平面位置，保留高程
    pub fn moved_to(&self, point: Point2) -> Self {
        Self {
            x: point.x,
            y: point.y,
            z: self.z,
        }
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.map_or(true, f64::is_finite)
    }
}

impl From<Point2> for Vertex {
    fn from(p: Point2) -> Self {
        Self::new(p.x, p.y)
    }
}

/// 线段
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Line {
    pub start: Point2,
    pub end: Point2,
}

impl Line {
    pub fn new(start: Point2, end: Point2) -> Self {
        Self { start, end }
    }

    /// 计算线段长度
    pub fn length(&self) -> f64 {
        (self.end - self.start).norm()
    }

    /// 计算线段中点
    pub fn midpoint(&self) -> Point2 {
        self.point_at(0.5)
    }

    /// 参数 t ∈ [0, 1] 处的点
    pub fn point_at(&self, t: f64) -> Point2 {
        self.start + (self.end - self.start) * t
    }

    /// 计算点到线段的距离
    pub fn distance_to_point(&self, point: &Point2) -> f64 {
        let v: Vector2 = self.end - self.start;
        let w: Vector2 = point - self.start;

        let c1 = w.dot(&v);
        if c1 <= 0.0 {
            return (point - self.start).norm();
        }

        let c2 = v.dot(&v);
        if c2 <= c1 {
            return (point - self.end).norm();
        }

        let b = c1 / c2;
        let pb = self.start + v * b;
        (point - pb).norm()
    }

    /// 点在线段方向上的投影参数（未截断）
    pub fn project(&self, point: &Point2) -> f64 {
        let v = self.end - self.start;
        let len2 = v.dot(&v);
        if len2 < EPSILON {
            return 0.0;
        }
        (point - self.start).dot(&v) / len2
    }

    pub fn bounding_box(&self) -> BoundingBox2 {
        BoundingBox2::from_points([self.start, self.end])
    }
}

/// 两条线段的相交结果
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SegmentIntersection {
    None,
    /// 单点相交（含端点接触）
    Point(Point2),
    /// 共线重叠，给出重叠区间的两个端点
    Overlap(Point2, Point2),
}

impl SegmentIntersection {
    pub fn is_none(&self) -> bool {
        matches!(self, SegmentIntersection::None)
    }
}

/// 线段求交
pub fn intersect_segments(a: &Line, b: &Line) -> SegmentIntersection {
    let d1 = cross(&b.start, &b.end, &a.start);
    let d2 = cross(&b.start, &b.end, &a.end);
    let d3 = cross(&a.start, &a.end, &b.start);
    let d4 = cross(&a.start, &a.end, &b.end);

    let straddles = |p: f64, q: f64| (p > 0.0 && q < 0.0) || (p < 0.0 && q > 0.0);
    if straddles(d1, d2) && straddles(d3, d4) {
        let t = d1 / (d1 - d2);
        return SegmentIntersection::Point(a.point_at(t));
    }

    // 端点接触或共线重叠
    let mut touches: Vec<Point2> = Vec::with_capacity(4);
    for (p, seg) in [(a.start, b), (a.end, b), (b.start, a), (b.end, a)] {
        if seg.distance_to_point(&p) <= TOUCH_TOLERANCE
            && !touches.iter().any(|t| (t - p).norm() <= TOUCH_TOLERANCE)
        {
            touches.push(p);
        }
    }

    match touches.as_slice() {
        [] => SegmentIntersection::None,
        [p] => SegmentIntersection::Point(*p),
        [p, q, ..] => SegmentIntersection::Overlap(*p, *q),
    }
}

/// 环的走向
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Winding {
    CounterClockwise,
    Clockwise,
    /// 面积为零
    Degenerate,
}

/// 点相对于环的位置
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointLocation {
    Inside,
    Outside,
    Boundary,
}

/// 闭合环
///
/// 顶点序列按源数据保存，通常首尾重复（闭合点）。
/// 所有面积、线段类运算都基于 [`Ring::cycle`]，即去掉重复闭合点后的循环序列。
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Ring {
    pub vertices: Vec<Vertex>,
}

impl Ring {
    pub fn new(vertices: Vec<Vertex>) -> Self {
        Self { vertices }
    }

    /// 从点列表创建（无高程）
    pub fn from_points(points: impl IntoIterator<Item = Point2>) -> Self {
        Self {
            vertices: points.into_iter().map(Vertex::from).collect(),
        }
    }

    /// 顶点数量（含闭合点）
    pub fn len(&self) -> usize {
        self.vertices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }

    pub fn points(&self) -> impl Iterator<Item = Point2> + '_ {
        self.vertices.iter().map(Vertex::point)
    }

    /// 首尾点距离
    pub fn closure_gap(&self) -> f64 {
        match (self.vertices.first(), self.vertices.last()) {
            (Some(first), Some(last)) if self.vertices.len() > 1 => {
                (last.point() - first.point()).norm()
            }
            _ => 0.0,
        }
    }

    /// 首尾点在容差内是否重合
    pub fn is_closed(&self, tolerance: f64) -> bool {
        self.closure_gap() <= tolerance
    }

    /// 去掉重复闭合点后的循环顶点序列
    pub fn cycle(&self) -> &[Vertex] {
        let n = self.vertices.len();
        if n > 1 && self.vertices[0].point() == self.vertices[n - 1].point() {
            &self.vertices[..n - 1]
        } else {
            &self.vertices
        }
    }

    /// 按循环序列遍历所有边（含末点回到首点的边）
    pub fn segments(&self) -> impl Iterator<Item = Line> + '_ {
        let cycle = self.cycle();
        let n = if cycle.len() < 2 { 0 } else { cycle.len() };
        (0..n).map(move |i| Line::new(cycle[i].point(), cycle[(i + 1) % n].point()))
    }

    /// 有向面积（鞋带公式），逆时针为正
    pub fn signed_area(&self) -> f64 {
        let cycle = self.cycle();
        if cycle.len() < 3 {
            return 0.0;
        }
        // 以首点为参考减小大坐标下的抵消误差
        let origin = cycle[0].point();
        let mut sum = 0.0;
        for i in 1..cycle.len() - 1 {
            sum += cross(&origin, &cycle[i].point(), &cycle[i + 1].point());
        }
        sum / 2.0
    }

    pub fn area(&self) -> f64 {
        self.signed_area().abs()
    }

    pub fn perimeter(&self) -> f64 {
        self.segments().map(|s| s.length()).sum()
    }

    pub fn winding(&self) -> Winding {
        let area = self.signed_area();
        if area.abs() < EPSILON {
            Winding::Degenerate
        } else if area > 0.0 {
            Winding::CounterClockwise
        } else {
            Winding::Clockwise
        }
    }

    /// 面积加权质心，零面积时返回 None
    pub fn centroid(&self) -> Option<Point2> {
        let cycle = self.cycle();
        if cycle.len() < 3 {
            return None;
        }
        let origin = cycle[0].point();
        let mut area2 = 0.0;
        let mut cx = 0.0;
        let mut cy = 0.0;
        for i in 1..cycle.len() - 1 {
            let a = cycle[i].point() - origin;
            let b = cycle[i + 1].point() - origin;
            let c = a.x * b.y - a.y * b.x;
            area2 += c;
            cx += (a.x + b.x) * c;
            cy += (a.y + b.y) * c;
        }
        if area2.abs() < EPSILON {
            return None;
        }
        Some(Point2::new(
            origin.x + cx / (3.0 * area2),
            origin.y + cy / (3.0 * area2),
        ))
    }

    pub fn bounding_box(&self) -> BoundingBox2 {
        BoundingBox2::from_points(self.points())
    }

    /// 点到环边界的最短距离
    pub fn distance_to_point(&self, point: &Point2) -> f64 {
        self.segments()
            .map(|s| s.distance_to_point(point))
            .fold(f64::INFINITY, f64::min)
    }

    /// 判断点的位置，距边界不超过 tolerance 视为在边界上
    pub fn locate_point(&self, point: &Point2, tolerance: f64) -> PointLocation {
        if self.distance_to_point(point) <= tolerance {
            return PointLocation::Boundary;
        }
        // 射线法（奇偶规则）
        let mut inside = false;
        for seg in self.segments() {
            let (p, q) = (seg.start, seg.end);
            if (p.y > point.y) != (q.y > point.y) {
                let x = p.x + (point.y - p.y) * (q.x - p.x) / (q.y - p.y);
                if point.x < x {
                    inside = !inside;
                }
            }
        }
        if inside {
            PointLocation::Inside
        } else {
            PointLocation::Outside
        }
    }

    /// 严格在环内部
    pub fn contains_point(&self, point: &Point2) -> bool {
        self.locate_point(point, TOUCH_TOLERANCE) == PointLocation::Inside
    }

    /// 反转顶点顺序
    pub fn reversed(&self) -> Ring {
        let mut vertices = self.vertices.clone();
        vertices.reverse();
        Ring { vertices }
    }

    /// 返回指定走向的副本；零面积环原样返回
    pub fn with_winding(&self, winding: Winding) -> Ring {
        let current = self.winding();
        if current == Winding::Degenerate || winding == Winding::Degenerate || current == winding
        {
            self.clone()
        } else {
            self.reversed()
        }
    }
}

/// 带洞多边形的面积
pub fn polygon_area(outer: &Ring, holes: &[Ring]) -> f64 {
    outer.area() - holes.iter().map(Ring::area).sum::<f64>()
}

/// 点是否在带洞多边形的内部（不含边界）
pub fn polygon_contains(outer: &Ring, holes: &[Ring], point: &Point2) -> bool {
    outer.contains_point(point)
        && holes
            .iter()
            .all(|h| h.locate_point(point, TOUCH_TOLERANCE) == PointLocation::Outside)
}

/// 多边形内部代表点（扫描线法）
///
/// 在若干水平线上求与所有环的交点，取最宽的内部区间中点。
/// 对凹多边形和带洞多边形同样有效。
pub fn interior_point(outer: &Ring, holes: &[Ring]) -> Option<Point2> {
    let bbox = outer.bounding_box();
    if bbox.is_empty() || bbox.height() <= 0.0 {
        return None;
    }
    let vertex_ys: Vec<f64> = std::iter::once(outer)
        .chain(holes.iter())
        .flat_map(|r| r.points().map(|p| p.y))
        .collect();

    const FRACTIONS: [f64; 9] = [0.5, 0.25, 0.75, 0.375, 0.625, 0.125, 0.875, 0.0625, 0.9375];
    for fraction in FRACTIONS {
        let mut y = bbox.min.y + bbox.height() * fraction;
        // 避开顶点所在高度
        if vertex_ys.iter().any(|vy| (vy - y).abs() < 1e-9) {
            y += bbox.height() * 1e-7;
        }

        let mut xs: Vec<f64> = Vec::new();
        for ring in std::iter::once(outer).chain(holes.iter()) {
            for seg in ring.segments() {
                let (p, q) = (seg.start, seg.end);
                if (p.y > y) != (q.y > y) {
                    xs.push(p.x + (y - p.y) * (q.x - p.x) / (q.y - p.y));
                }
            }
        }
        xs.sort_by(f64::total_cmp);

        let best = xs
            .chunks_exact(2)
            .map(|pair| (pair[0], pair[1]))
            .max_by(|a, b| (a.1 - a.0).total_cmp(&(b.1 - b.0)));
        if let Some((x0, x1)) = best {
            if x1 - x0 > 0.0 {
                return Some(Point2::new((x0 + x1) / 2.0, y));
            }
        }
    }
    None
}
