mod common;

use std::sync::{Arc, Mutex};

use common::{AnalysisBuilder, despacho_header, three_page_despacho};
use despacho_extract::{
    CatalogConfig, DespachoExtractor, DocType, Enricher, Evidence, Field, FieldName, HonorariosTable, LogLevel,
    PeritoCatalog, PeritoInfo, RunLog, BoundingBox,
};

fn extractor() -> DespachoExtractor {
    DespachoExtractor::new().unwrap()
}

#[test_log::test]
fn administrative_number_and_signer_from_three_page_window() {
    let analysis = three_page_despacho(&[
        (0.6, "Processo SEI nº 123456-78.2024.1.02/pg. 3"),
        (0.5, "Trata-se de requisição de pagamento de honorários periciais."),
    ])
    .build();

    let result = extractor().extract(&analysis);
    assert!(result.errors.is_empty(), "{:?}", result.errors);

    let doc = result.despacho().unwrap();
    assert_eq!((doc.start_page, doc.end_page), (1, 3));
    assert_eq!(doc.value(FieldName::ProcessoAdministrativo), "123456-78.2024.1.02");
    assert_eq!(doc.value(FieldName::Assinante), "João Silva");

    let signer = doc.field(FieldName::Assinante).unwrap();
    assert_eq!(signer.evidence.as_ref().map(|e| e.page), Some(3));
    assert!(result.signatures.iter().any(|s| s.signer == "João Silva"));
}

#[test_log::test]
fn no_anchor_anywhere_means_no_candidates() {
    let analysis = AnalysisBuilder::new("avulso.pdf")
        .page(&[(0.6, "Relatório de atividades do trimestre.")])
        .page(&[(0.6, "Anexo sem cabeçalho algum.")])
        .build();

    let result = extractor().extract(&analysis);
    assert_eq!(result.errors, vec!["no_candidates_found".to_string()]);
    assert!(result.documents.is_empty());
    assert!(result.candidates.is_empty());
}

#[test_log::test]
fn first_page_fee_is_bound_to_first_page() {
    let analysis = three_page_despacho(&[
        (0.6, "Processo nº 0801234-56.2023.8.15.0001"),
        (0.5, "Os honorários arbitrados no valor de R$ 1.234,56 foram fixados pelo juízo."),
    ])
    .build();

    let result = extractor().extract(&analysis);
    let doc = result.despacho().unwrap();
    let fee = doc.field(FieldName::ValorArbitradoJz).unwrap();
    assert_eq!(fee.value, "R$ 1.234,56");
    assert_eq!(fee.evidence.as_ref().map(|e| e.page), Some(doc.start_page));
    assert!(doc.field(FieldName::ValorArbitradoDe).unwrap().is_absent());
    assert_eq!(doc.value(FieldName::ProcessoJudicial), "0801234-56.2023.8.15.0001");
}

#[test_log::test]
fn catalog_overwrites_specialty_of_weak_name() {
    let peritos = PeritoCatalog::from_entries(vec![PeritoInfo {
        name: "MARIA SOUZA".to_string(),
        cpf: None,
        specialty: Some("Psicologia".to_string()),
    }]);
    let table = HonorariosTable::empty();
    let config = CatalogConfig::default();

    let mut fields: std::collections::BTreeMap<FieldName, Field> =
        FieldName::ALL.iter().map(|f| (*f, Field::not_found())).collect();
    let evidence = Evidence::new(1, BoundingBox::default(), "Perita: Maria Souza");
    fields.insert(FieldName::Perito, Field::found("Maria Souza", 0.5, "regex", Some(evidence)));

    let mut warnings = Vec::new();
    Enricher::new(&config, &peritos, &table).enrich(&mut fields, &mut warnings, &mut RunLog::default());

    let specialty = &fields[&FieldName::Especialidade];
    assert_eq!(specialty.value, "Psicologia");
    assert_eq!(specialty.method, "catalog");
    assert!(warnings.is_empty());
}

#[test_log::test]
fn single_page_window_is_rejected() {
    let analysis = AnalysisBuilder::new("curto.pdf")
        .page(&[
            (0.95, "PODER JUDICIÁRIO"),
            (0.79, "DESPACHO"),
            (0.5, "Defiro o pedido."),
            (0.08, "Documento assinado eletronicamente por João Silva"),
        ])
        .build();

    let result = extractor().extract(&analysis);
    assert_eq!(result.errors, vec!["range_below_min_pages".to_string()]);
    assert!(result.documents.is_empty());
    assert!(!result.candidates.is_empty());
}

#[test_log::test]
fn bookmarked_window_is_not_extended() {
    let mut first = despacho_header();
    first.push((0.5, "Defiro o pedido."));
    let analysis = AnalysisBuilder::new("marcado.pdf")
        .page(&[(0.6, "Petição inicial.")])
        .page(&first)
        .page(&[(0.6, "Anexo I")])
        .bookmark("Petição", 1)
        .bookmark("Despacho DIESP", 2)
        .bookmark("Anexo", 3)
        .build();

    let result = extractor().extract(&analysis);
    assert_eq!(result.errors, vec!["range_below_min_pages".to_string()]);
    assert!(result.documents.is_empty());
}

#[test_log::test]
fn certidao_value_reaches_the_despacho() {
    let analysis = three_page_despacho(&[(0.6, "Processo SEI nº 123456-78.2024.1.02")])
        .page(&[
            (0.95, "PODER JUDICIÁRIO"),
            (0.92, "CONSELHO DA MAGISTRATURA"),
            (0.82, "CERTIDÃO"),
            (0.6, "CERTIFICO que o Conselho da Magistratura aprovou"),
            (0.58, "honorários de R$ 2.500,00 ao perito"),
            (0.45, "Sessão realizada em 12/03/2024"),
            (0.08, "Documento assinado eletronicamente por Ana Lima"),
        ])
        .bookmark("Despacho", 1)
        .bookmark("Certidão CM", 4)
        .build();

    let result = extractor().extract(&analysis);
    assert!(result.errors.is_empty(), "{:?}", result.errors);
    assert_eq!(result.documents.len(), 2);

    let certidao = result.certidao().unwrap();
    assert_eq!(certidao.doc_type, DocType::CertidaoCm);
    assert_eq!((certidao.start_page, certidao.end_page), (4, 4));
    assert_eq!(certidao.value(FieldName::ValorArbitradoCm), "R$ 2.500,00");
    assert_eq!(certidao.value(FieldName::Assinante), "Ana Lima");

    let despacho = result.despacho().unwrap();
    assert_eq!((despacho.start_page, despacho.end_page), (1, 3));
    let cm = despacho.field(FieldName::ValorArbitradoCm).unwrap();
    assert_eq!(cm.value, "R$ 2.500,00");
    assert_eq!(cm.method, "certidao");
    assert!(!despacho.warnings.iter().any(|w| w == "certidao_not_found"));
}

#[test_log::test]
fn missing_certidao_is_a_warning() {
    let analysis = three_page_despacho(&[(0.6, "Processo SEI nº 123456-78.2024.1.02")]).build();
    let result = extractor().extract(&analysis);
    let doc = result.despacho().unwrap();
    assert!(doc.warnings.iter().any(|w| w == "certidao_not_found"));
    assert!(result.certidao().is_none());
}

#[test_log::test]
fn unresolved_numbers_still_emit_a_document() {
    let analysis = three_page_despacho(&[(0.6, "Defiro o pedido de pagamento.")]).build();
    let result = extractor().extract(&analysis);
    assert!(result.errors.is_empty());
    let doc = result.despacho().unwrap();
    assert!(doc.warnings.iter().any(|w| w == "process_numbers_unresolved"));
    assert_eq!(doc.fields.len(), FieldName::ALL.len());
    for field in doc.fields.values() {
        assert!(!field.method.is_empty());
        if field.is_absent() {
            assert_eq!(field.confidence, 0.1);
        } else {
            assert!(field.evidence.is_some());
        }
    }
}

#[test_log::test]
fn results_are_deterministic_and_logged() {
    let seen = Arc::new(Mutex::new(0usize));
    let counter = Arc::clone(&seen);
    let extractor = DespachoExtractor::builder()
        .on_log(move |_| *counter.lock().unwrap() += 1)
        .build()
        .unwrap();
    let analysis = three_page_despacho(&[(0.6, "Processo SEI nº 123456-78.2024.1.02")]).build();

    let a = extractor.extract(&analysis);
    let b = extractor.extract(&analysis);
    let scores = |r: &despacho_extract::ExtractionResult| {
        r.candidates.iter().map(|c| (c.start_page, c.end_page, c.edit_score, c.diff_score)).collect::<Vec<_>>()
    };
    assert_eq!(scores(&a), scores(&b));
    assert_eq!(a.run_info.config_sha256, b.run_info.config_sha256);
    assert_eq!(a.run_info.config_sha256.len(), 64);

    assert!(!a.logs.is_empty());
    assert!(a.logs.iter().any(|e| e.level == LogLevel::Info && e.stage == "segment"));
    assert_eq!(*seen.lock().unwrap(), a.logs.len() + b.logs.len());
}

#[test_log::test]
fn raw_text_pages_are_still_read() {
    let analysis = AnalysisBuilder::new("texto.pdf")
        .text_page("PODER JUDICIÁRIO\nDIRETORIA ESPECIAL\nDESPACHO\n\nProcesso SEI nº 123456-78.2024.1.02")
        .text_page("Documento assinado eletronicamente por João Silva")
        .build();

    let result = extractor().extract(&analysis);
    assert!(result.errors.is_empty(), "{:?}", result.errors);
    let doc = result.despacho().unwrap();
    assert_eq!(doc.value(FieldName::ProcessoAdministrativo), "123456-78.2024.1.02");
    assert_eq!(doc.value(FieldName::Assinante), "João Silva");
}

#[test_log::test]
fn digital_signature_is_the_last_resort_for_signer() {
    let analysis = AnalysisBuilder::new("assinado.pdf")
        .page(&{
            let mut rows = despacho_header();
            rows.push((0.6, "Processo SEI nº 123456-78.2024.1.02"));
            rows
        })
        .page(&[(0.6, "Cumpra-se."), (0.08, "Código verificador 4F2A9C")])
        .signature("Maria Lima", 2)
        .build();

    let result = extractor().extract(&analysis);
    assert!(result.errors.is_empty(), "{:?}", result.errors);
    let signer = result.despacho().unwrap().field(FieldName::Assinante).unwrap();
    assert_eq!(signer.value, "Maria Lima");
    assert_eq!(signer.method, "signature_digital");
    assert_eq!(signer.evidence.as_ref().map(|e| e.page), Some(2));
}

#[test_log::test]
fn declared_page_count_cannot_outgrow_the_dump() {
    let mut analysis = three_page_despacho(&[(0.6, "Processo SEI nº 123456-78.2024.1.02")]).build();
    analysis.info.page_count = u32::MAX;

    let extractor = DespachoExtractor::new().unwrap();
    let blank = extractor.config().window.blank_pages;
    let result = extractor.extract(&analysis);
    assert!(result.errors.is_empty(), "{:?}", result.errors);
    assert_eq!(result.pdf_info.page_count, 3 + blank);
    assert_eq!(result.despacho().unwrap().end_page, 3);
}
