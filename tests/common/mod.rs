#![allow(dead_code)]

use despacho_extract::{
    BoundingBox, DigitalSignature, OutlineNode, PageInput, PdfAnalysis, PdfInfo, RawWord, SignatureWidget,
};

const GLYPH: f64 = 0.01;
const HALF_HEIGHT: f64 = 0.006;
const LEFT: f64 = 0.08;

/// Words of one text row centred at `y` (0 = page bottom), one glyph per
/// character and one glyph between words.
pub fn row_words(y: f64, text: &str) -> Vec<RawWord> {
    let mut x = LEFT;
    text.split_whitespace()
        .map(|t| {
            let w = GLYPH * t.chars().count() as f64;
            let (x0, x1, y0, y1) = (x, x + w, y - HALF_HEIGHT, y + HALF_HEIGHT);
            x = x1 + GLYPH;
            RawWord {
                text: t.to_string(),
                quad: [[x0, y0], [x1, y0], [x1, y1], [x0, y1]],
            }
        })
        .collect()
}

/// Collaborator dump assembled page by page.
pub struct AnalysisBuilder {
    info: PdfInfo,
    pages: Vec<PageInput>,
    outline: Vec<OutlineNode>,
    signatures: Vec<DigitalSignature>,
}

impl AnalysisBuilder {
    pub fn new(name: &str) -> Self {
        AnalysisBuilder {
            info: PdfInfo {
                name: name.to_string(),
                path: format!("/dossiers/{}", name),
                sha256: String::new(),
                page_count: 0,
            },
            pages: Vec::new(),
            outline: Vec::new(),
            signatures: Vec::new(),
        }
    }

    /// Next page from `(y, text)` rows.
    pub fn page(mut self, rows: &[(f64, &str)]) -> Self {
        let number = self.pages.len() as u32 + 1;
        let text = rows.iter().map(|(_, t)| *t).collect::<Vec<_>>().join("\n");
        self.pages.push(PageInput {
            number,
            text,
            rotation: 0,
            words: rows.iter().flat_map(|(y, t)| row_words(*y, t)).collect(),
        });
        self
    }

    /// Next page with raw text only, as a collaborator without word boxes
    /// would deliver it.
    pub fn text_page(mut self, text: &str) -> Self {
        let number = self.pages.len() as u32 + 1;
        self.pages.push(PageInput {
            number,
            text: text.to_string(),
            rotation: 0,
            words: Vec::new(),
        });
        self
    }

    pub fn bookmark(mut self, title: &str, page: u32) -> Self {
        self.outline.push(OutlineNode {
            title: title.to_string(),
            page,
            children: Vec::new(),
        });
        self
    }

    pub fn signature(mut self, signer: &str, page: u32) -> Self {
        self.signatures.push(DigitalSignature {
            signer_name: signer.to_string(),
            certificate_subject: format!("CN={}, O=ICP-Brasil", signer),
            sign_date: Some("D:20240312101500".to_string()),
            widgets: vec![SignatureWidget {
                page,
                bbox: BoundingBox::new(0.1, 0.02, 0.5, 0.06),
            }],
            ..DigitalSignature::default()
        });
        self
    }

    pub fn build(mut self) -> PdfAnalysis {
        self.info.page_count = self.pages.len() as u32;
        PdfAnalysis {
            info: self.info,
            pages: self.pages,
            outline: self.outline,
            signatures: self.signatures,
        }
    }
}

pub fn despacho_header() -> Vec<(f64, &'static str)> {
    vec![
        (0.95, "PODER JUDICIÁRIO"),
        (0.92, "TRIBUNAL DE JUSTIÇA DA PARAÍBA"),
        (0.82, "DIRETORIA ESPECIAL"),
        (0.79, "DESPACHO"),
    ]
}

/// Three-page despacho with header anchors on page 1 and the electronic
/// signature on page 3.
pub fn three_page_despacho(body: &[(f64, &'static str)]) -> AnalysisBuilder {
    let mut first = despacho_header();
    first.extend_from_slice(body);
    AnalysisBuilder::new("dossie.pdf")
        .page(&first)
        .page(&[(0.6, "Encaminhe-se à Gerência de Contabilidade para as providências.")])
        .page(&[
            (0.6, "Cumpra-se."),
            (0.08, "Documento assinado eletronicamente por João Silva"),
        ])
}
