use calamine::{open_workbook_auto, Data, DataType, Reader};
use chrono::NaiveDate;
use polars::{df, prelude::DataFrame};
use routereport::{config::Config, error::ReportError, frame::write_workbook, report};
use std::{
    fs,
    path::{Path, PathBuf},
};
use tempfile::tempdir;

const LONG_TICKET: &str = "2405200012345678901";

fn xlsx(dir: &Path, name: &str, df: DataFrame) -> PathBuf {
    let path = dir.join(name);
    write_workbook(&path, &[("Sheet1", &df)]).unwrap();
    path
}

/// Two routes: 北京-上海 is significant almost everywhere, 天津-广州 only for
/// line-haul transportation.
fn write_sources(data: &Path, reference: &Path) {
    fs::create_dir_all(data.join("0520")).unwrap();
    let day = data.join("0520");

    xlsx(
        &day,
        "淘天平台线路时效分析-各环节延误量.xlsx",
        df!(
            "城市线路名称" => ["北京-上海", "天津-广州"],
            "延误量最大3环节" => ["路由,网点交件,中心出港操作", "干线运输"],
            "网点交件延误量" => [20.0, 1.0],
            "中心出港操作延误量" => [20.0, 1.0],
            "干线运输延误量" => [10.0, 96.0],
            "路由延误量" => [40.0, 1.0],
            "中心进港操作延误量" => [10.0, 1.0],
            "派签延误量" => [0.0, 0.0]
        )
        .unwrap(),
    );
    xlsx(
        &day,
        "淘天平台线路时效分析-城市线路汇总-日.xlsx",
        df!(
            "城市线路名称" => ["北京-上海", "天津-广州"],
            "揽收城市" => ["北京", "天津"],
            "派送城市" => ["上海", "广州"],
            "标准" => [48.0, 60.0],
            "达成率(%)" => [95.5, 80.0],
            "与第一差值(%)" => [-1.2, -10.0]
        )
        .unwrap(),
    );
    xlsx(
        &day,
        "淘天平台线路时效分析-未达成车签明细.xlsx",
        df!(
            "城市到城市线路名称" => ["北京-上海", "北京-上海", "天津-广州", "天津-广州"],
            "车签" => [LONG_TICKET, "T2", "T3", "T4"],
            "最晚发车时间" => [
                "2024-05-20 08:30:00",
                "2024-05-20 09:30:00",
                "2024-05-20 10:00:00",
                "2024-05-20 11:00:00"
            ],
            "未达成量" => [150.0, 50.0, 300.0, 900.0],
            "是否考核" => ["是", "是", "是", "否"]
        )
        .unwrap(),
    );
    fs::write(
        data.join("线路罚款-0520.csv"),
        format!(
            "线路罚款明细,,\n电子车签,线路名称,罚款金额\n{},北京中心-上海中心,200\nT3,天津中心-广州中心,80\n",
            LONG_TICKET
        ),
    )
    .unwrap();
    xlsx(
        &day,
        "淘天平台线路时效分析-出港环节.xlsx",
        df!(
            "城市线路名称" => ["北京-上海", "天津-广州"],
            "揽收城市名称" => ["北京", "天津"],
            "出港超时库存" => [30.0, 5.0]
        )
        .unwrap(),
    );
    xlsx(
        &day,
        "淘天平台线路时效分析-进港环节.xlsx",
        df!(
            "城市线路名称" => ["北京-上海", "天津-广州"],
            "派送城市名称" => ["上海", "广州"],
            "进港超时库存" => [8.0, 4.0]
        )
        .unwrap(),
    );
    xlsx(
        &day,
        "出港超时库存.xlsx",
        df!(
            "中心名称" => ["华北中心"],
            "发车超时库存票数" => [500.0],
            "超时库存占比" => [12.5]
        )
        .unwrap(),
    );
    xlsx(
        &day,
        "进港超时库存.xlsx",
        df!(
            "中心名称" => ["华东中心"],
            "到车超时库存票数" => [40.0],
            "超时库存占比" => [3.0]
        )
        .unwrap(),
    );
    xlsx(
        &day,
        "淘天平台线路时效分析-网点交件.xlsx",
        df!(
            "城市线路名称" => ["北京-上海", "天津-广州", "北京-上海"],
            "网点名称" => ["朝阳", "南开", "海淀"],
            "交件延误量" => [12.0, 3.0, 8.0]
        )
        .unwrap(),
    );
    xlsx(
        &day,
        "淘天平台线路时效分析-派签.xlsx",
        df!(
            "城市线路名称" => ["天津-广州", "北京-上海"],
            "网点名称" => ["南开", "朝阳"],
            "延误量" => [2.0, 5.0]
        )
        .unwrap(),
    );

    fs::create_dir_all(reference.parent().unwrap()).unwrap();
    let lookup = df!(
        "城市" => ["北京", "天津", "上海", "广州"],
        "发货中心" => ["华北中心", "华北中心", "华东中心", "华南中心"],
        "收货中心" => ["华北中心", "华北中心", "华东中心", "华南中心"]
    )
    .unwrap();
    write_workbook(reference, &[("Sheet1", &lookup)]).unwrap();
}

fn config(root: &Path) -> Config {
    let mut cfg =
        Config::from_json(concat!(env!("CARGO_MANIFEST_DIR"), "/config/config.json")).unwrap();
    cfg.data_path = root.join("data");
    cfg.catalog.reference_path = root.join("config").join("城市对应中心基础表1119.xlsx");
    cfg.report.output_dir = root.join("output");
    cfg
}

fn sheet(path: &Path, name: &str) -> Vec<Vec<Data>> {
    let mut wb = open_workbook_auto(path).unwrap();
    let range = wb.worksheet_range(name).unwrap();
    range.rows().map(|r| r.to_vec()).collect()
}

fn text(d: &Data) -> String {
    d.get_string().map(str::to_string).unwrap_or_else(|| d.to_string())
}

#[test]
fn full_run_writes_six_sheets() {
    let dir = tempdir().unwrap();
    let cfg = config(dir.path());
    write_sources(&cfg.data_path, &cfg.catalog.reference_path);

    let date = NaiveDate::from_ymd_opt(2024, 5, 20).unwrap();
    let path = report::run(&cfg, date).unwrap();
    assert_eq!(
        path,
        dir.path().join("output").join("05-20淘天线路时效GTP数据.xlsx")
    );

    let wb = open_workbook_auto(&path).unwrap();
    assert_eq!(
        wb.sheet_names().to_vec(),
        vec!["GPT", "路由", "运输", "交件", "派签", "中心库存"]
    );

    // GPT: shares as percent text, named percent columns as text too.
    let gpt = sheet(&path, "GPT");
    let header: Vec<String> = gpt[0].iter().map(text).collect();
    let col = |name: &str| header.iter().position(|h| h == name).unwrap();
    assert_eq!(header[4], "延误量最大3环节");
    let first = &gpt[1];
    assert_eq!(text(&first[col("城市线路")]), "北京-上海");
    assert_eq!(text(&first[col("路由占比")]), "40.00%");
    assert_eq!(text(&first[col("达成率(%)")]), "95.50%");
    assert_eq!(text(&first[col("派签占比")]), "0.00%");

    // Routing: only the long ticket survives both the ratio filter and the floor.
    let routing = sheet(&path, "路由");
    assert_eq!(routing.len(), 2);
    let header: Vec<String> = routing[0].iter().map(text).collect();
    assert_eq!(header, cfg.routing.column_order);
    let row = &routing[1];
    let at = |name: &str| row[header.iter().position(|h| h == name).unwrap()].clone();
    assert_eq!(text(&at("车签")), LONG_TICKET);
    assert_eq!(text(&at("建议网点交件时间")), "07:30:00");
    assert_eq!(text(&at("中心线路")), "北京中心-上海中心");
    assert_eq!(at("罚款金额").as_f64(), Some(200.0));

    // Transportation: both routes, floor 10, sorted by route.
    let transport = sheet(&path, "运输");
    let ticket = cfg
        .transportation
        .column_order
        .iter()
        .position(|c| c == "车签")
        .unwrap();
    let tickets: Vec<String> = transport[1..].iter().map(|r| text(&r[ticket])).collect();
    assert_eq!(tickets, vec![LONG_TICKET, "T2", "T3"]);

    // Submission: only 北京-上海, total repeated on each row at column 1.
    let submission = sheet(&path, "交件");
    assert_eq!(text(&submission[0][1]), "Top5网点延误量总计");
    assert_eq!(submission.len(), 3);
    assert!(submission[1..].iter().all(|r| r[1].as_f64() == Some(20.0)));

    // Dispatch: every known route.
    let dispatch = sheet(&path, "派签");
    assert_eq!(dispatch.len(), 3);
    assert_eq!(text(&dispatch[1][0]), "北京-上海");
    assert_eq!(text(&dispatch[2][0]), "天津-广州");

    // Inventory: outbound block above inbound block, each with its summary row.
    let inventory = sheet(&path, "中心库存");
    let kinds: Vec<String> = inventory[1..].iter().map(|r| text(&r[0])).collect();
    assert_eq!(kinds, vec!["出港库存", "出港库存-汇总", "进港库存", "进港库存-汇总"]);
    assert_eq!(text(&inventory[1][1]), "华北中心");
    assert_eq!(inventory[1][2].as_f64(), Some(30.0));
    assert_eq!(text(&inventory[1][4]), "12.50%");
    assert_eq!(inventory[2][2].as_f64(), Some(30.0));
    assert_eq!(text(&inventory[3][1]), "华东中心");
    assert_eq!(inventory[4][2].as_f64(), Some(8.0));
}

#[test]
fn missing_dispatch_extract_aborts_without_output() {
    let dir = tempdir().unwrap();
    let cfg = config(dir.path());
    write_sources(&cfg.data_path, &cfg.catalog.reference_path);
    fs::remove_file(cfg.data_path.join("0520").join("淘天平台线路时效分析-派签.xlsx")).unwrap();

    let date = NaiveDate::from_ymd_opt(2024, 5, 20).unwrap();
    let err = report::run(&cfg, date).unwrap_err();
    match err.downcast_ref::<ReportError>() {
        Some(ReportError::MissingSource { stage, substring, .. }) => {
            assert_eq!(stage, "dispatch");
            assert_eq!(substring, "派签");
        }
        other => panic!("unexpected {other:?}"),
    }
    assert!(!cfg.report.output_dir.exists());
}

#[test]
fn dry_run_classification_matches_rule_table() {
    let dir = tempdir().unwrap();
    let cfg = config(dir.path());
    write_sources(&cfg.data_path, &cfg.catalog.reference_path);

    let paths = report::categorize(&cfg).unwrap();
    let json = serde_json::to_value(&paths).unwrap();
    let count = |key: &str| json[key].as_array().map(|a| a.len()).unwrap_or(0);
    assert_eq!(count("base_metrics"), 2);
    assert_eq!(count("routing"), 2);
    assert_eq!(count("transportation"), 2);
    // detail, inventory and the reference lookup
    assert_eq!(count("outbound"), 3);
    assert_eq!(count("inbound"), 3);
    assert_eq!(count("submission"), 1);
    assert_eq!(count("dispatch"), 1);
}
