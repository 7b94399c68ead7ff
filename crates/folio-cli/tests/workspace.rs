use std::fs;

mod common;

use common::{parse_json, stdout_lines, Sandbox};

#[test]
fn init_add_find_remove() -> anyhow::Result<()> {
    let sandbox = Sandbox::new()?;
    sandbox.folio().args(["workspace", "init"]).assert().success();
    assert!(sandbox.workspace.join("mets.xml").is_file());

    sandbox.write("OCR-D-IMG/0001.png", b"png")?;
    sandbox
        .folio()
        .args([
            "workspace",
            "add",
            "-G",
            "OCR-D-IMG",
            "-i",
            "IMG_0001",
            "-g",
            "PHYS_0001",
            "OCR-D-IMG/0001.png",
        ])
        .assert()
        .success();
    sandbox
        .folio()
        .args([
            "workspace",
            "add",
            "-G",
            "OCR-D-GT",
            "-i",
            "GT_0001",
            "-m",
            "application/vnd.prima.page+xml",
            "-g",
            "PHYS_0002",
            "https://example.org/gt/0001.xml",
        ])
        .assert()
        .success();

    let output = sandbox
        .folio()
        .args(["workspace", "find", "-k", "id,mimetype,url,page_id"])
        .output()?;
    assert!(output.status.success());
    assert_eq!(
        stdout_lines(&output),
        vec![
            "IMG_0001\timage/png\tOCR-D-IMG/0001.png\tPHYS_0001",
            "GT_0001\tapplication/vnd.prima.page+xml\thttps://example.org/gt/0001.xml\tPHYS_0002",
        ]
    );

    let output = sandbox
        .folio()
        .args(["workspace", "find", "--local-only", "-k", "id"])
        .output()?;
    assert_eq!(stdout_lines(&output), vec!["IMG_0001"]);

    let output = sandbox
        .folio()
        .args(["workspace", "find", "-G", "//OCR-D-.*", "-g", "PHYS_0002", "-k", "id"])
        .output()?;
    assert_eq!(stdout_lines(&output), vec!["GT_0001"]);

    let output = sandbox.folio().args(["workspace", "list-group"]).output()?;
    assert_eq!(stdout_lines(&output), vec!["OCR-D-IMG", "OCR-D-GT"]);
    let output = sandbox.folio().args(["workspace", "list-page"]).output()?;
    assert_eq!(stdout_lines(&output), vec!["PHYS_0001", "PHYS_0002"]);

    sandbox
        .folio()
        .args(["workspace", "remove", "GT_0001"])
        .assert()
        .success();
    let output = sandbox.folio().args(["workspace", "list-page"]).output()?;
    assert_eq!(stdout_lines(&output), vec!["PHYS_0001"]);
    Ok(())
}

#[test]
fn duplicate_add_is_a_user_error_unless_forced() -> anyhow::Result<()> {
    let sandbox = Sandbox::new()?;
    sandbox.folio().args(["workspace", "init"]).assert().success();
    let add = |extra: &[&str]| {
        let mut cmd = sandbox.folio();
        cmd.args(["workspace", "add", "-G", "OCR-D-IMG", "-i", "f1"])
            .args(extra)
            .arg("f1.tif");
        cmd
    };
    add(&[]).assert().success();
    add(&[]).assert().code(1);
    add(&["--force", "-m", "image/jp2"]).assert().success();

    let output = sandbox
        .folio()
        .args(["workspace", "find", "-i", "f1", "-k", "mimetype"])
        .output()?;
    assert_eq!(stdout_lines(&output), vec!["image/jp2"]);
    Ok(())
}

#[test]
fn create_scans_the_folder() -> anyhow::Result<()> {
    let sandbox = Sandbox::new()?;
    sandbox.write("0001.tif", b"tif")?;
    sandbox.write("alto/0001.xml", b"<alto/>")?;
    sandbox.write("page/0001.xml", b"<PcGts/>")?;

    sandbox.folio().args(["workspace", "create"]).assert().success();
    let output = sandbox
        .folio()
        .args(["workspace", "find", "-k", "id,file_grp,mimetype"])
        .output()?;
    assert_eq!(
        stdout_lines(&output),
        vec![
            "OCR-D-IMG_0001_TIF\tOCR-D-IMG\timage/tiff",
            "OCR-D-OCR-ALTO_0001_XML\tOCR-D-OCR-ALTO\tapplication/alto+xml",
            "OCR-D-OCR-PAGE_0001_XML\tOCR-D-OCR-PAGE\tapplication/vnd.prima.page+xml",
        ]
    );

    sandbox.folio().args(["workspace", "create"]).assert().code(1);
    sandbox
        .folio()
        .args(["workspace", "create", "--clobber"])
        .assert()
        .success();
    Ok(())
}

#[test]
fn json_envelope_carries_details() -> anyhow::Result<()> {
    let sandbox = Sandbox::new()?;
    sandbox.folio().args(["workspace", "init"]).assert().success();
    sandbox.folio().args(["workspace", "add", "-G", "GRP", "-i", "a", "a.png"]).assert().success();

    let output = sandbox
        .folio()
        .args(["--json", "workspace", "find"])
        .output()?;
    let payload = parse_json(&output)?;
    assert_eq!(payload["status"], "ok");
    assert_eq!(payload["details"]["files"][0]["id"], "a");
    assert_eq!(payload["details"]["files"][0]["mimetype"], "image/png");
    Ok(())
}

#[test]
fn missing_workspace_reports_not_found() -> anyhow::Result<()> {
    let sandbox = Sandbox::new()?;
    let output = sandbox
        .folio()
        .args(["--json", "workspace", "list-group"])
        .output()?;
    assert_eq!(output.status.code(), Some(1));
    let payload = parse_json(&output)?;
    assert_eq!(payload["status"], "user-error");
    assert_eq!(payload["details"]["kind"], "not_found");

    sandbox
        .folio()
        .args(["workspace", "find", "-k", "bogus"])
        .assert()
        .code(1);
    Ok(())
}

#[test]
fn clone_copies_a_local_mets() -> anyhow::Result<()> {
    let sandbox = Sandbox::new()?;
    sandbox.folio().args(["workspace", "init"]).assert().success();
    sandbox.write("img.png", b"png")?;
    sandbox
        .folio()
        .args(["workspace", "add", "-G", "OCR-D-IMG", "-i", "img", "img.png"])
        .assert()
        .success();

    let target = sandbox.root().join("cloned");
    let mets = sandbox.workspace.join("mets.xml");
    sandbox
        .folio()
        .arg("workspace")
        .arg("clone")
        .arg(&mets)
        .arg(&target)
        .assert()
        .success();
    assert_eq!(fs::read(target.join("mets.xml"))?, fs::read(&mets)?);
    Ok(())
}
