use anyhow::{anyhow, Context};
use printpdf::{BuiltinFont, Mm, PdfDocument};
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use uuid::Uuid;

// A4 portrait, sized in millimetres. printpdf measures y from the bottom
// edge; layout below measures from the top and converts when painting.
pub const PAGE_WIDTH_MM: f32 = 210.0;
pub const PAGE_HEIGHT_MM: f32 = 297.0;
pub const MARGIN_TOP_MM: f32 = 20.0;
pub const MARGIN_LEFT_MM: f32 = 15.0;
pub const LINE_HEIGHT_MM: f32 = 8.0;
pub const LINES_PER_PAGE: usize = 32;

const HEADER_FONT_SIZE: f32 = 14.0;
const BODY_FONT_SIZE: f32 = 11.0;

#[derive(Debug, Clone)]
pub struct GradeLine {
    pub title: String,
    pub grade: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct ReportData {
    pub username: String,
    pub assignment_grades: Vec<GradeLine>,
    pub quiz_grades: Vec<GradeLine>,
    pub courses: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReportLine {
    pub page: usize,
    pub y_mm: f32,
    pub text: String,
}

fn grade_label(grade: Option<f64>) -> String {
    match grade {
        Some(v) => format!("{}", v),
        None => "Not graded".to_string(),
    }
}

/// Vertical stacking with a fixed line height: header, one line per
/// assignment grade, one per quiz grade, one per enrolled course. An empty
/// section still occupies exactly one placeholder line so the offsets of
/// the sections below it stay fixed.
pub fn layout_report(data: &ReportData) -> Vec<ReportLine> {
    let mut lines: Vec<ReportLine> = Vec::new();

    let mut push = |lines: &mut Vec<ReportLine>, text: String| {
        let index = lines.len();
        lines.push(ReportLine {
            page: index / LINES_PER_PAGE,
            y_mm: MARGIN_TOP_MM + (index % LINES_PER_PAGE) as f32 * LINE_HEIGHT_MM,
            text,
        });
    };

    push(&mut lines, format!("Grade report: {}", data.username));

    if data.assignment_grades.is_empty() {
        push(&mut lines, "No assignments available".to_string());
    } else {
        for row in &data.assignment_grades {
            push(
                &mut lines,
                format!("Assignment: {} - Grade: {}", row.title, grade_label(row.grade)),
            );
        }
    }

    if data.quiz_grades.is_empty() {
        push(&mut lines, "No quizzes available".to_string());
    } else {
        for row in &data.quiz_grades {
            push(
                &mut lines,
                format!("Quiz: {} - Grade: {}", row.title, grade_label(row.grade)),
            );
        }
    }

    if data.courses.is_empty() {
        push(&mut lines, "No courses available".to_string());
    } else {
        for title in &data.courses {
            push(&mut lines, format!("Course: {}", title));
        }
    }

    lines
}

pub fn render_pdf(data: &ReportData) -> anyhow::Result<Vec<u8>> {
    let lines = layout_report(data);
    let page_count = lines.last().map(|l| l.page + 1).unwrap_or(1);

    let (doc, first_page, first_layer) = PdfDocument::new(
        format!("Grade report: {}", data.username),
        Mm(PAGE_WIDTH_MM),
        Mm(PAGE_HEIGHT_MM),
        "Layer 1",
    );
    let font = doc
        .add_builtin_font(BuiltinFont::Helvetica)
        .map_err(|e| anyhow!("failed to load report font: {}", e))?;

    let mut pages = vec![(first_page, first_layer)];
    for _ in 1..page_count {
        pages.push(doc.add_page(Mm(PAGE_WIDTH_MM), Mm(PAGE_HEIGHT_MM), "Layer 1"));
    }

    for (i, line) in lines.iter().enumerate() {
        let (page, layer) = pages[line.page];
        let size = if i == 0 {
            HEADER_FONT_SIZE
        } else {
            BODY_FONT_SIZE
        };
        doc.get_page(page).get_layer(layer).use_text(
            line.text.clone(),
            size,
            Mm(MARGIN_LEFT_MM),
            Mm(PAGE_HEIGHT_MM - line.y_mm),
            &font,
        );
    }

    let mut bytes: Vec<u8> = Vec::new();
    {
        let mut writer = BufWriter::new(&mut bytes);
        doc.save(&mut writer)
            .map_err(|e| anyhow!("failed to serialize report pdf: {}", e))?;
    }
    Ok(bytes)
}

/// Transient on-disk copy of a rendered report. The file lives in the
/// system temp directory under a per-invocation unique name, so two
/// concurrent reports for the same student never race on one path, and is
/// removed on drop on every exit path.
pub struct ReportFile {
    path: PathBuf,
}

impl ReportFile {
    pub fn create(student_id: &str, bytes: &[u8]) -> anyhow::Result<Self> {
        let name = format!("report_{}_{}.pdf", student_id, Uuid::new_v4());
        let path = std::env::temp_dir().join(name);
        std::fs::write(&path, bytes)
            .with_context(|| format!("failed to write report file {}", path.to_string_lossy()))?;
        Ok(ReportFile { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn read(&self) -> anyhow::Result<Vec<u8>> {
        std::fs::read(&self.path)
            .with_context(|| format!("failed to read report file {}", self.path.to_string_lossy()))
    }
}

impl Drop for ReportFile {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}
